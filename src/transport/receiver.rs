//! Inbound message reassembly.
//!
//! A receiver starts with a guessed window `[lower, upper]` because the
//! message length is unknown. SYN pins the lower edge and FIN the upper
//! one; once nothing inside the window is outstanding the chunks are joined
//! and delivered, exactly once. The receiver keeps acknowledging duplicates
//! until the sender's closing ACK+FIN arrives, after which it goes quiet.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use super::connection::ConnectionId;
use crate::codec::TransportHeader;
use crate::core::Address;

/// Result of feeding a segment to a receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveStep {
    /// The segment belongs to this receiver.
    pub accepted: bool,
    /// Acknowledgment to send back.
    pub ack: Option<TransportHeader>,
    /// Reassembled message, on the step that completes it.
    pub delivered: Option<String>,
    /// Reserved numbers the receiver no longer needs.
    pub released: Vec<u32>,
    /// The closing ACK+FIN was seen on this step.
    pub closed: bool,
    /// The window, the stored chunks or the closed flag moved.
    pub changed: bool,
}

/// One inbound message.
#[derive(Debug, Clone)]
pub struct Receiver {
    id: ConnectionId,
    peer: Address,
    lower: u32,
    upper: u32,
    waiting: BTreeSet<u32>,
    chunks: BTreeMap<u32, String>,
    reserved: BTreeSet<u32>,
    delivered: bool,
    closed: bool,
}

impl Receiver {
    /// Create a receiver for `window`. `reserved` is the part of the window
    /// this receiver took from the allocator and must give back.
    pub fn new(
        id: ConnectionId,
        peer: Address,
        window: RangeInclusive<u32>,
        reserved: BTreeSet<u32>,
    ) -> Self {
        let (lower, upper) = window.into_inner();
        Self {
            id,
            peer,
            lower,
            upper,
            reserved,
            waiting: (lower..=upper).collect(),
            chunks: BTreeMap::new(),
            delivered: false,
            closed: false,
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sending peer.
    pub fn peer(&self) -> Address {
        self.peer
    }

    /// Current window.
    pub fn window(&self) -> RangeInclusive<u32> {
        self.lower..=self.upper
    }

    /// True once the message has been handed up.
    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    /// True once the closing ACK+FIN was seen.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Numbers still held in reserve.
    pub fn reserved(&self) -> impl Iterator<Item = u32> + '_ {
        self.reserved.iter().copied()
    }

    /// True if this receiver would take `segment`.
    ///
    /// Acknowledgments are never for a receiver; of the ACK-flagged frames
    /// only the sender's closing frame is.
    pub fn accepts(&self, segment: &TransportHeader) -> bool {
        let data_or_closing = !segment.ack || segment.is_closing();
        data_or_closing && self.window().contains(&segment.sequence)
    }

    /// Apply an inbound segment.
    pub fn on_segment(&mut self, segment: &TransportHeader) -> ReceiveStep {
        if !self.accepts(segment) {
            return ReceiveStep::default();
        }
        let mut step = ReceiveStep {
            accepted: true,
            ..ReceiveStep::default()
        };
        if self.closed {
            return step;
        }

        let before = (self.lower, self.upper, self.waiting.len());
        let seq = segment.sequence;
        if segment.fin {
            self.upper = seq;
            self.waiting.retain(|&s| s <= seq);
            step.released.extend(self.reserved.split_off(&(seq + 1)));
        }
        if segment.syn {
            self.lower = seq;
            self.waiting.retain(|&s| s >= seq);
            let kept = self.reserved.split_off(&seq);
            step.released.extend(std::mem::replace(&mut self.reserved, kept));
        }
        if self.waiting.remove(&seq) {
            self.chunks.insert(seq, segment.message.clone());
        }

        if self.waiting.is_empty() {
            if !self.delivered {
                self.delivered = true;
                step.delivered = Some(self.assemble());
            }
            if segment.is_closing() {
                self.closed = true;
                step.closed = true;
                step.changed = true;
                return step;
            }
        }

        step.changed = before != (self.lower, self.upper, self.waiting.len());
        step.ack = Some(TransportHeader::ack(seq, self.delivered, self.peer));
        step
    }

    fn assemble(&self) -> String {
        self.chunks
            .range(self.lower..=self.upper)
            .map(|(_, chunk)| chunk.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: Address = 4;

    fn receiver(window: RangeInclusive<u32>) -> Receiver {
        Receiver::new(ConnectionId(1), PEER, window.clone(), window.collect())
    }

    fn seg(seq: u32, text: &str) -> TransportHeader {
        TransportHeader::data(seq, text, 2)
    }

    #[test]
    fn test_in_order_delivery() {
        let mut r = receiver(5..=45);
        let step = r.on_segment(&seg(5, "hello ").with_syn(true));
        assert!(step.accepted);
        assert_eq!(step.ack, Some(TransportHeader::ack(5, false, PEER)));
        assert!(step.delivered.is_none());

        r.on_segment(&seg(6, "mesh "));
        let step = r.on_segment(&seg(7, "world").with_fin(true));
        assert_eq!(step.delivered.as_deref(), Some("hello mesh world"));
        assert_eq!(step.ack, Some(TransportHeader::ack(7, true, PEER)));
        assert_eq!(step.released, (8..=45).collect::<Vec<_>>());
        assert_eq!(r.window(), 5..=7);
    }

    #[test]
    fn test_out_of_order_delivers_once() {
        let mut r = receiver(10..=50);
        let fin = r.on_segment(&seg(13, "d").with_fin(true));
        assert!(fin.delivered.is_none());
        r.on_segment(&seg(11, "b"));
        r.on_segment(&seg(12, "c"));
        let step = r.on_segment(&seg(10, "a").with_syn(true));
        assert_eq!(step.delivered.as_deref(), Some("abcd"));

        // Retransmitted duplicate is acked but not delivered again.
        let dup = r.on_segment(&seg(12, "c"));
        assert!(dup.accepted);
        assert!(dup.delivered.is_none());
        assert_eq!(dup.ack, Some(TransportHeader::ack(12, true, PEER)));
    }

    #[test]
    fn test_syn_shrinks_lower_edge() {
        // Window guessed from an earlier point than the real start.
        let mut r = receiver(3..=47);
        r.on_segment(&seg(8, "y").with_fin(true));
        let step = r.on_segment(&seg(7, "x").with_syn(true));
        assert_eq!(step.released, vec![3, 4, 5, 6]);
        assert_eq!(step.delivered.as_deref(), Some("xy"));
        assert_eq!(r.reserved().collect::<Vec<_>>(), vec![7, 8]);
    }

    #[test]
    fn test_closing_ack_fin_silences() {
        let mut r = receiver(1..=41);
        r.on_segment(&seg(1, "solo").with_syn(true).with_fin(true));
        assert!(r.is_delivered());

        let closing = seg(1, "solo").with_syn(true).with_ack(true).with_fin(true);
        let step = r.on_segment(&closing);
        assert!(step.accepted && step.closed);
        assert!(step.ack.is_none());
        assert!(step.delivered.is_none());
        assert!(r.is_closed());

        let late = r.on_segment(&seg(1, "solo").with_syn(true).with_fin(true));
        assert!(late.accepted);
        assert!(late.ack.is_none());
    }

    #[test]
    fn test_rejects_outside_window_and_pure_acks() {
        let mut r = receiver(10..=50);
        assert!(!r.on_segment(&seg(9, "x")).accepted);
        assert!(!r.on_segment(&seg(51, "x")).accepted);
        assert!(!r.on_segment(&TransportHeader::ack(20, false, 2)).accepted);
        assert!(!r.on_segment(&TransportHeader::ack(20, true, 2)).accepted);
        assert!(r.accepts(&seg(50, "x")));
    }

    #[test]
    fn test_duplicates_leave_state_unchanged() {
        let mut r = receiver(1..=41);
        let first = r.on_segment(&seg(1, "solo").with_syn(true).with_fin(true));
        assert!(first.changed);

        let dup = r.on_segment(&seg(1, "solo").with_syn(true).with_fin(true));
        assert!(dup.accepted && dup.ack.is_some());
        assert!(!dup.changed);

        let closing = seg(1, "solo").with_syn(true).with_ack(true).with_fin(true);
        assert!(r.on_segment(&closing).changed);
        let late = r.on_segment(&seg(1, "solo").with_syn(true).with_fin(true));
        assert!(late.accepted && !late.changed);
    }

    #[test]
    fn test_closing_frame_can_complete_delivery() {
        // Last chunk lost; the sender's closing frame carries its text.
        let mut r = receiver(1..=41);
        r.on_segment(&seg(1, "ab").with_syn(true));
        let closing = seg(2, "cd").with_ack(true).with_fin(true);
        let step = r.on_segment(&closing);
        assert_eq!(step.delivered.as_deref(), Some("abcd"));
        assert!(step.closed);
    }
}
