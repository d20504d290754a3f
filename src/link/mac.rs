//! CSMA/CA medium access.
//!
//! [`Mac`] is the handle the upper layers submit frames through; it never
//! blocks. [`MacWorker`] owns the queue and transmits one frame at a time:
//!
//! 1. wait until the medium is free
//! 2. back off for a random number of slots
//! 3. re-check; transmit if still free, otherwise start over with the same frame
//!
//! Contention only delays frames, it never drops them, and frames leave in
//! submission order. The one place a frame is lost is a full send queue:
//! [`Mac::submit`] refuses it with [`MacError::QueueFull`] and logs a
//! warning. The queue is sized by `NodeConfig::mac_queue_capacity`.

use std::ops::Range;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use super::frame::{FrameTag, LinkFrame};
use crate::codec::Header;
use crate::core::PayloadError;
use crate::core::constants::{BACKOFF_SLOT, BACKOFF_SLOTS};

/// Errors from the medium access layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MacError {
    /// Only data frames may be submitted.
    #[error("invalid message type: {0}")]
    InvalidMessageType(&'static str),

    /// The header could not be encoded.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// The send queue is full.
    #[error("send queue full")]
    QueueFull,

    /// The worker has stopped.
    #[error("medium access worker stopped")]
    Closed,
}

/// Random backoff drawn in whole slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Slot length.
    pub slot: Duration,
    /// Slot count range, `[start, end)`.
    pub slots: Range<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            slot: BACKOFF_SLOT,
            slots: BACKOFF_SLOTS,
        }
    }
}

impl Backoff {
    /// Draw one backoff delay.
    pub fn draw(&self) -> Duration {
        if self.slots.is_empty() {
            return self.slot * self.slots.start;
        }
        self.slot * rand::thread_rng().gen_range(self.slots.clone())
    }
}

/// Submission handle and medium state.
///
/// Cloning shares the queue and the medium flag.
#[derive(Debug, Clone)]
pub struct Mac {
    queue: mpsc::Sender<LinkFrame>,
    medium: watch::Sender<bool>,
}

impl Mac {
    /// Create the handle and its worker.
    ///
    /// The worker writes transmitted frames to `outbound`. The medium starts
    /// out free.
    pub fn new(
        outbound: mpsc::Sender<LinkFrame>,
        backoff: Backoff,
        queue_capacity: usize,
    ) -> (Self, MacWorker) {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        let (medium_tx, medium_rx) = watch::channel(true);
        let worker = MacWorker {
            queue: queue_rx,
            medium: medium_rx,
            outbound,
            backoff,
        };
        (
            Self {
                queue: queue_tx,
                medium: medium_tx,
            },
            worker,
        )
    }

    /// Queue a data frame for transmission.
    pub fn submit(&self, frame: LinkFrame) -> Result<(), MacError> {
        if let LinkFrame::Control(tag) = frame {
            return Err(MacError::InvalidMessageType(tag_name(tag)));
        }
        self.queue.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame) => {
                warn!(
                    tag = ?frame.tag(),
                    capacity = self.queue.max_capacity(),
                    "send queue full, frame dropped"
                );
                MacError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => MacError::Closed,
        })
    }

    /// Encode a header and queue it.
    ///
    /// Address headers become long frames and dynamic addressing headers
    /// short frames. Bare transport or distance-vector headers are refused.
    pub fn submit_header(&self, header: &Header) -> Result<(), MacError> {
        let frame = match header {
            Header::Address(h) => LinkFrame::Data(h.to_bytes()?),
            Header::DynamicAddressing(h) => LinkFrame::DataShort(h.to_bytes()?.to_vec()),
            other => return Err(MacError::InvalidMessageType(other.kind())),
        };
        self.submit(frame)
    }

    /// Record the medium state signalled by the channel.
    ///
    /// Waiters are woken on every transition to free.
    pub fn set_medium_free(&self, free: bool) {
        let changed = self.medium.send_if_modified(|current| {
            let changed = *current != free;
            *current = free;
            changed
        });
        if changed {
            trace!(free, "medium state changed");
        }
    }

    /// Current medium state.
    pub fn is_medium_free(&self) -> bool {
        *self.medium.borrow()
    }
}

/// The transmit loop. Run it with [`MacWorker::run`].
#[derive(Debug)]
pub struct MacWorker {
    queue: mpsc::Receiver<LinkFrame>,
    medium: watch::Receiver<bool>,
    outbound: mpsc::Sender<LinkFrame>,
    backoff: Backoff,
}

impl MacWorker {
    /// Transmit queued frames until the handle or the channel goes away.
    pub async fn run(mut self) {
        while let Some(frame) = self.queue.recv().await {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                let open = self.medium.wait_for(|free| *free).await.is_ok();
                if !open {
                    return;
                }
                tokio::time::sleep(self.backoff.draw()).await;
                if *self.medium.borrow() {
                    break;
                }
                trace!(attempts, "medium busy after backoff");
            }
            debug!(tag = ?frame.tag(), attempts, "transmitting frame");
            if self.outbound.send(frame).await.is_err() {
                debug!("channel closed, medium access worker stopping");
                return;
            }
        }
    }

    /// Take the raw queue instead of running, to inspect submissions.
    #[cfg(test)]
    pub(crate) fn into_queue(self) -> mpsc::Receiver<LinkFrame> {
        self.queue
    }
}

fn tag_name(tag: FrameTag) -> &'static str {
    match tag {
        FrameTag::Free => "FREE",
        FrameTag::Busy => "BUSY",
        FrameTag::Data => "DATA",
        FrameTag::Sending => "SENDING",
        FrameTag::DoneSending => "DONE_SENDING",
        FrameTag::DataShort => "DATA_SHORT",
        FrameTag::End => "END",
        FrameTag::Hello => "HELLO",
        FrameTag::TokenAccepted => "TOKEN_ACCEPTED",
        FrameTag::TokenRejected => "TOKEN_REJECTED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DynamicAddressingHeader, TransportHeader};
    use tokio::time::Instant;

    fn fixed_backoff(slots: u32) -> Backoff {
        Backoff {
            slot: Duration::from_millis(100),
            slots: slots..slots,
        }
    }

    #[test]
    fn test_backoff_range() {
        let backoff = Backoff::default();
        for _ in 0..100 {
            let d = backoff.draw();
            assert!(d >= Duration::from_secs(1));
            assert!(d < Duration::from_secs(3));
        }
        assert_eq!(fixed_backoff(5).draw(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_submit_rejects_control_frames() {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (mac, _worker) = Mac::new(out_tx, Backoff::default(), 4);
        assert_eq!(
            mac.submit(LinkFrame::Control(FrameTag::Free)),
            Err(MacError::InvalidMessageType("FREE"))
        );
        let bare = Header::Transport(TransportHeader::data(1, "x", 2));
        assert_eq!(
            mac.submit_header(&bare),
            Err(MacError::InvalidMessageType("transport"))
        );
    }

    #[tokio::test]
    async fn test_submit_never_blocks() {
        let (out_tx, _out_rx) = mpsc::channel(1);
        let (mac, _worker) = Mac::new(out_tx, Backoff::default(), 2);
        mac.submit(LinkFrame::Data(vec![1])).unwrap();
        mac.submit(LinkFrame::Data(vec![2])).unwrap();
        assert_eq!(mac.submit(LinkFrame::Data(vec![3])), Err(MacError::QueueFull));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_keeps_queued_frames() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (mac, worker) = Mac::new(out_tx, fixed_backoff(10), 2);
        mac.submit(LinkFrame::Data(vec![1])).unwrap();
        mac.submit(LinkFrame::Data(vec![2])).unwrap();
        assert_eq!(mac.submit(LinkFrame::Data(vec![3])), Err(MacError::QueueFull));

        tokio::spawn(worker.run());
        assert_eq!(out_rx.recv().await, Some(LinkFrame::Data(vec![1])));
        mac.submit(LinkFrame::Data(vec![4])).unwrap();
        assert_eq!(out_rx.recv().await, Some(LinkFrame::Data(vec![2])));
        assert_eq!(out_rx.recv().await, Some(LinkFrame::Data(vec![4])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_sent_in_order_after_backoff() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (mac, worker) = Mac::new(out_tx, fixed_backoff(10), 8);
        tokio::spawn(worker.run());

        let start = Instant::now();
        let hello = DynamicAddressingHeader {
            protocol: 0,
            conflict: false,
            sequence: 9,
            address: 3,
        };
        mac.submit(LinkFrame::Data(vec![1])).unwrap();
        mac.submit_header(&Header::DynamicAddressing(hello)).unwrap();
        mac.submit(LinkFrame::Data(vec![3])).unwrap();

        assert_eq!(out_rx.recv().await, Some(LinkFrame::Data(vec![1])));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(
            out_rx.recv().await,
            Some(LinkFrame::DataShort(hello.to_bytes().unwrap().to_vec()))
        );
        assert_eq!(out_rx.recv().await, Some(LinkFrame::Data(vec![3])));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_while_medium_busy() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (mac, worker) = Mac::new(out_tx, fixed_backoff(10), 8);
        tokio::spawn(worker.run());

        mac.set_medium_free(false);
        assert!(!mac.is_medium_free());
        mac.submit(LinkFrame::Data(vec![7])).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(out_rx.try_recv().is_err());

        let start = Instant::now();
        mac.set_medium_free(true);
        assert_eq!(out_rx.recv().await, Some(LinkFrame::Data(vec![7])));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_at_final_check_restarts_cycle() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (mac, worker) = Mac::new(out_tx, fixed_backoff(10), 8);
        tokio::spawn(worker.run());

        let start = Instant::now();
        mac.submit(LinkFrame::Data(vec![7])).unwrap();

        // Medium goes busy during the first backoff, free again later.
        tokio::time::sleep(Duration::from_millis(500)).await;
        mac.set_medium_free(false);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(out_rx.try_recv().is_err());
        mac.set_medium_free(true);

        assert_eq!(out_rx.recv().await, Some(LinkFrame::Data(vec![7])));
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }
}
