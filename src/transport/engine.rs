//! Transport engine: the registry of live senders and receivers.
//!
//! Inbound segments are offered to existing connections first: text-free
//! acknowledgments to senders, data and closing frames to receivers. A data
//! segment nobody claims opens a new receiver. Every chunk a sender owns gets its own
//! retransmission task, and every receiver an idle task, all registered in
//! a [`TimerSet`] so completion can cancel them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::allocator::SequenceAllocator;
use super::connection::{ConnectionId, ConnectionRole, TransportConfig, split_message};
use super::receiver::{ReceiveStep, Receiver};
use super::sender::{AckOutcome, Sender};
use super::timers::{TimerKey, TimerSet};
use crate::codec::TransportHeader;
use crate::core::{
    Address, BROADCAST_ADDRESS, MAX_ADDRESS, MessageSink, SegmentLink, TransportError,
};

#[derive(Debug, Default)]
struct Connections {
    senders: BTreeMap<ConnectionId, Sender>,
    receivers: BTreeMap<ConnectionId, Receiver>,
}

struct Inner<L, S> {
    link: Arc<L>,
    sink: Arc<S>,
    config: TransportConfig,
    allocator: SequenceAllocator,
    connections: Mutex<Connections>,
    timers: TimerSet,
    next_id: AtomicU64,
}

/// Reliable segmented message transport.
///
/// Cloning yields another handle to the same engine. Timer tasks hold only
/// weak references, so dropping every handle stops retransmission.
pub struct TransportEngine<L, S> {
    inner: Arc<Inner<L, S>>,
}

impl<L, S> Clone for TransportEngine<L, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: SegmentLink, S: MessageSink> TransportEngine<L, S> {
    /// Create an engine sending through `link` and delivering to `sink`.
    pub fn new(link: Arc<L>, sink: Arc<S>, config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                link,
                sink,
                config,
                allocator: SequenceAllocator::new(),
                connections: Mutex::new(Connections::default()),
                timers: TimerSet::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Transport settings.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Per-peer sequence bookkeeping.
    pub fn allocator(&self) -> &SequenceAllocator {
        &self.inner.allocator
    }

    /// Send `text` to `destination`.
    ///
    /// [`BROADCAST_ADDRESS`] opens one sender per currently known peer.
    /// A missing route is not an error here; the chunks are retransmitted
    /// until a route appears or the message is acknowledged.
    pub fn send_message(
        &self,
        text: &str,
        destination: Address,
    ) -> Result<Vec<ConnectionId>, TransportError> {
        if text.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        if destination > MAX_ADDRESS {
            return Err(TransportError::InvalidDestination(destination));
        }
        let peers = if destination == BROADCAST_ADDRESS {
            self.inner.link.known_peers()
        } else {
            vec![destination]
        };
        if peers.is_empty() {
            debug!("broadcast with no known peers");
        }

        let chunks = split_message(text);
        peers
            .into_iter()
            .map(|peer| self.inner.open_sender(peer, chunks.clone()))
            .collect()
    }

    /// Handle a segment the router delivered from `source`.
    pub fn on_segment(&self, source: Address, segment: TransportHeader) {
        let inner = &self.inner;
        if segment.is_acknowledgment() {
            if !inner.on_ack(source, &segment) {
                trace!(peer = source, seq = segment.sequence, "stray acknowledgment");
            }
            return;
        }
        if inner.on_receiver_segment(source, &segment) {
            return;
        }
        if segment.ack {
            trace!(peer = source, seq = segment.sequence, "closing frame for no receiver");
            return;
        }
        inner.open_receiver(source, &segment);
    }

    /// Live connections.
    pub fn connections(&self) -> Vec<(ConnectionId, ConnectionRole, Address)> {
        let conns = self.inner.connections.lock();
        let senders = conns
            .senders
            .values()
            .map(|s| (s.id(), ConnectionRole::Sender, s.peer()));
        let receivers = conns
            .receivers
            .values()
            .map(|r| (r.id(), ConnectionRole::Receiver, r.peer()));
        let mut all: Vec<_> = senders.chain(receivers).collect();
        all.sort_by_key(|(id, _, _)| *id);
        all
    }

    /// Number of scheduled timers.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// Drop every connection and cancel every timer.
    pub fn shutdown(&self) {
        self.inner.timers.clear();
        let conns = std::mem::take(&mut *self.inner.connections.lock());
        for sender in conns.senders.values() {
            self.inner.allocator.release(sender.peer(), sender.sequences());
        }
        for receiver in conns.receivers.values() {
            self.inner.allocator.release(receiver.peer(), receiver.reserved());
        }
        debug!(
            senders = conns.senders.len(),
            receivers = conns.receivers.len(),
            "transport shut down"
        );
    }
}

impl<L: SegmentLink, S: MessageSink> Inner<L, S> {
    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn transmit(&self, segment: TransportHeader) {
        let (peer, seq) = (segment.destination, segment.sequence);
        match self.link.send_segment(segment) {
            Ok(()) => trace!(peer, seq, "segment sent"),
            Err(e) if e.is_no_route() => debug!(peer, seq, "no route, waiting for retransmission"),
            Err(e) => warn!(peer, seq, error = %e, "segment not sent"),
        }
    }

    fn open_sender(
        self: &Arc<Self>,
        peer: Address,
        chunks: Vec<String>,
    ) -> Result<ConnectionId, TransportError> {
        let count =
            u32::try_from(chunks.len()).map_err(|_| TransportError::SequenceSpaceExhausted(peer))?;
        let first = self.allocator.allocate_block(peer, count)?;
        let id = self.next_id();
        let sender = Sender::new(id, peer, first, chunks);
        let segments = sender.segments();
        self.connections.lock().senders.insert(id, sender);
        debug!(%id, peer, first, count, "sender opened");

        for segment in segments {
            let seq = segment.sequence;
            self.transmit(segment);
            let delay = self.config.initial_retransmit_delay(seq - first);
            self.arm_retransmit(id, seq, delay);
        }
        Ok(id)
    }

    fn arm_retransmit(self: &Arc<Self>, id: ConnectionId, seq: u32, first_delay: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.retransmit_base;
        let task = tokio::spawn(async move {
            tokio::time::sleep(first_delay).await;
            loop {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let segment = inner
                    .connections
                    .lock()
                    .senders
                    .get(&id)
                    .and_then(|s| s.pending_segment(seq));
                let Some(segment) = segment else {
                    inner.timers.forget(TimerKey::Retransmit(id, seq));
                    return;
                };
                debug!(%id, seq, "retransmitting");
                inner.transmit(segment);
                drop(inner);
                tokio::time::sleep(period).await;
            }
        });
        self.timers
            .insert(TimerKey::Retransmit(id, seq), task.abort_handle());
    }

    /// Offer an acknowledgment to the senders toward `source`.
    fn on_ack(&self, source: Address, segment: &TransportHeader) -> bool {
        let mut conns = self.connections.lock();
        let hit = conns
            .senders
            .iter_mut()
            .filter(|(_, s)| s.peer() == source)
            .find_map(|(id, s)| match s.on_ack(segment) {
                AckOutcome::NotMine => None,
                outcome => Some((*id, outcome)),
            });
        let Some((id, outcome)) = hit else {
            return false;
        };

        match outcome {
            AckOutcome::Complete { cleared, closing } => {
                let finished = conns.senders.remove(&id);
                drop(conns);
                self.timers.cancel_connection(id);
                if let Some(sender) = finished {
                    self.allocator.release(sender.peer(), sender.sequences());
                }
                info!(%id, peer = source, cleared = cleared.len(), "message acknowledged");
                self.transmit(closing);
            }
            AckOutcome::Progress(cleared) => {
                drop(conns);
                for seq in cleared {
                    self.timers.cancel(TimerKey::Retransmit(id, seq));
                }
            }
            AckOutcome::NotMine => {}
        }
        true
    }

    /// Offer a segment to the receivers from `source`.
    fn on_receiver_segment(self: &Arc<Self>, source: Address, segment: &TransportHeader) -> bool {
        let step = self
            .connections
            .lock()
            .receivers
            .iter_mut()
            .filter(|(_, r)| r.peer() == source)
            .find_map(|(id, r)| {
                let step = r.on_segment(segment);
                step.accepted.then_some((*id, step))
            });
        match step {
            Some((id, step)) => {
                self.apply_receive_step(id, source, step);
                true
            }
            None => false,
        }
    }

    fn open_receiver(self: &Arc<Self>, source: Address, segment: &TransportHeader) {
        let seq = segment.sequence;
        let lower = if segment.syn {
            seq
        } else {
            self.allocator
                .highest_below(source, seq)
                .map_or(1, |highest| highest + 1)
        };
        let upper = seq.saturating_add(self.config.receiver_window);
        let reserved = self.allocator.reserve(source, lower..=upper);

        let id = self.next_id();
        let mut receiver = Receiver::new(id, source, lower..=upper, reserved);
        let step = receiver.on_segment(segment);
        self.connections.lock().receivers.insert(id, receiver);
        debug!(%id, peer = source, lower, upper, "receiver opened");
        self.apply_receive_step(id, source, step);
    }

    fn apply_receive_step(self: &Arc<Self>, id: ConnectionId, peer: Address, step: ReceiveStep) {
        if !step.released.is_empty() {
            self.allocator.release(peer, step.released);
        }
        if step.changed {
            self.arm_idle(id);
        }
        if step.closed {
            debug!(%id, peer, "receiver closed by sender");
        }
        if let Some(text) = step.delivered {
            info!(%id, peer, len = text.len(), "message received");
            self.sink.deliver_message(text, peer);
        }
        if let Some(ack) = step.ack {
            self.transmit(ack);
        }
    }

    fn arm_idle(self: &Arc<Self>, id: ConnectionId) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let timeout = self.config.receiver_idle_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.timers.forget(TimerKey::Idle(id));
                inner.close_receiver(id);
            }
        });
        self.timers.insert(TimerKey::Idle(id), task.abort_handle());
    }

    fn close_receiver(&self, id: ConnectionId) {
        let Some(receiver) = self.connections.lock().receivers.remove(&id) else {
            return;
        };
        self.allocator.release(receiver.peer(), receiver.reserved());
        self.timers.cancel_connection(id);
        debug!(
            %id,
            peer = receiver.peer(),
            delivered = receiver.is_delivered(),
            "receiver torn down"
        );
    }
}
