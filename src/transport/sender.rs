//! Outbound message state machine.
//!
//! A sender owns one message split into consecutive sequence numbers. It
//! produces the segments to transmit and tracks which are still waiting for
//! an acknowledgment. Timers live in the engine; the sender only answers
//! whether a given chunk is still pending.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use super::connection::ConnectionId;
use crate::codec::TransportHeader;
use crate::core::Address;

/// Result of feeding an acknowledgment to a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Acknowledgment for another connection.
    NotMine,
    /// These chunks are no longer pending.
    Progress(Vec<u32>),
    /// Every chunk is acknowledged; send this closing segment and drop the
    /// sender.
    Complete {
        /// Chunks cleared by this acknowledgment.
        cleared: Vec<u32>,
        /// Combined ACK+FIN for the last chunk.
        closing: TransportHeader,
    },
}

/// One outbound message.
#[derive(Debug, Clone)]
pub struct Sender {
    id: ConnectionId,
    peer: Address,
    first_seq: u32,
    chunks: BTreeMap<u32, String>,
    pending: BTreeSet<u32>,
}

impl Sender {
    /// Create a sender for `chunks` numbered from `first_seq`.
    ///
    /// `chunks` must not be empty.
    pub fn new(id: ConnectionId, peer: Address, first_seq: u32, chunks: Vec<String>) -> Self {
        let chunks: BTreeMap<u32, String> = (first_seq..).zip(chunks).collect();
        let pending = chunks.keys().copied().collect();
        Self {
            id,
            peer,
            first_seq,
            chunks,
            pending,
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Destination peer.
    pub fn peer(&self) -> Address {
        self.peer
    }

    /// Sequence numbers this sender owns.
    pub fn sequences(&self) -> RangeInclusive<u32> {
        self.first_seq..=self.last_seq()
    }

    /// Position of `seq` within the message.
    pub fn offset(&self, seq: u32) -> u32 {
        seq.saturating_sub(self.first_seq)
    }

    /// True if `seq` still awaits an acknowledgment.
    pub fn is_pending(&self, seq: u32) -> bool {
        self.pending.contains(&seq)
    }

    /// True once every chunk is acknowledged.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Every data segment, first to last.
    pub fn segments(&self) -> Vec<TransportHeader> {
        self.chunks
            .keys()
            .filter_map(|&seq| self.build(seq))
            .collect()
    }

    /// The data segment for `seq`, if it is still pending.
    pub fn pending_segment(&self, seq: u32) -> Option<TransportHeader> {
        if self.is_pending(seq) {
            self.build(seq)
        } else {
            None
        }
    }

    /// Apply an inbound segment from the peer.
    ///
    /// Only text-free acknowledgments inside this sender's range are taken;
    /// a closing frame belongs to the peer's own message. An acknowledgment
    /// carrying FIN clears everything.
    pub fn on_ack(&mut self, segment: &TransportHeader) -> AckOutcome {
        if !segment.is_acknowledgment() || !self.sequences().contains(&segment.sequence) {
            return AckOutcome::NotMine;
        }
        let cleared: Vec<u32> = if segment.fin {
            std::mem::take(&mut self.pending).into_iter().collect()
        } else if self.pending.remove(&segment.sequence) {
            vec![segment.sequence]
        } else {
            Vec::new()
        };

        if self.pending.is_empty() {
            AckOutcome::Complete {
                cleared,
                closing: self.closing_segment(),
            }
        } else {
            AckOutcome::Progress(cleared)
        }
    }

    /// The combined ACK+FIN that ends the exchange.
    pub fn closing_segment(&self) -> TransportHeader {
        let last = self.last_seq();
        let message = self.chunks.get(&last).cloned().unwrap_or_default();
        TransportHeader::data(last, message, self.peer)
            .with_syn(last == self.first_seq)
            .with_ack(true)
            .with_fin(true)
    }

    fn last_seq(&self) -> u32 {
        self.chunks.keys().next_back().copied().unwrap_or(self.first_seq)
    }

    fn build(&self, seq: u32) -> Option<TransportHeader> {
        let message = self.chunks.get(&seq)?;
        Some(
            TransportHeader::data(seq, message.clone(), self.peer)
                .with_syn(seq == self.first_seq)
                .with_fin(seq == self.last_seq()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Sender {
        let chunks = vec!["a".repeat(24), "b".repeat(24), "cc".to_string()];
        Sender::new(ConnectionId(1), 9, 10, chunks)
    }

    #[test]
    fn test_segments_flags() {
        let s = sender();
        let segs = s.segments();
        assert_eq!(segs.len(), 3);
        assert_eq!(
            segs.iter().map(|h| h.sequence).collect::<Vec<_>>(),
            vec![10, 11, 12]
        );
        assert!(segs[0].syn && !segs[0].fin);
        assert!(!segs[1].syn && !segs[1].fin);
        assert!(!segs[2].syn && segs[2].fin);
        assert!(segs.iter().all(|h| !h.ack && h.destination == 9));
        assert_eq!(s.offset(12), 2);
    }

    #[test]
    fn test_single_chunk_is_syn_and_fin() {
        let s = Sender::new(ConnectionId(2), 4, 1, vec!["hi".into()]);
        let seg = &s.segments()[0];
        assert!(seg.syn && seg.fin);
        let closing = s.closing_segment();
        assert!(closing.syn && closing.ack && closing.fin);
        assert_eq!(closing.message, "hi");
    }

    #[test]
    fn test_acks_clear_pending() {
        let mut s = sender();
        assert_eq!(
            s.on_ack(&TransportHeader::ack(11, false, 9)),
            AckOutcome::Progress(vec![11])
        );
        assert!(s.pending_segment(11).is_none());
        assert!(s.pending_segment(10).is_some());

        // Duplicate ack is accepted but clears nothing.
        assert_eq!(
            s.on_ack(&TransportHeader::ack(11, false, 9)),
            AckOutcome::Progress(vec![])
        );

        s.on_ack(&TransportHeader::ack(10, false, 9));
        let AckOutcome::Complete { cleared, closing } = s.on_ack(&TransportHeader::ack(12, false, 9))
        else {
            panic!("expected completion");
        };
        assert_eq!(cleared, vec![12]);
        assert_eq!(closing.sequence, 12);
        assert_eq!(closing.message, "cc");
        assert!(closing.ack && closing.fin && !closing.syn);
    }

    #[test]
    fn test_fin_ack_clears_everything() {
        let mut s = sender();
        let AckOutcome::Complete { cleared, .. } = s.on_ack(&TransportHeader::ack(10, true, 9))
        else {
            panic!("expected completion");
        };
        assert_eq!(cleared, vec![10, 11, 12]);
        assert!(s.is_complete());
    }

    #[test]
    fn test_rejects_foreign_segments() {
        let mut s = sender();
        assert_eq!(s.on_ack(&TransportHeader::ack(13, false, 9)), AckOutcome::NotMine);
        assert_eq!(s.on_ack(&TransportHeader::data(11, "x", 9)), AckOutcome::NotMine);
        assert!(!s.is_complete());
    }

    #[test]
    fn test_peer_closing_frame_is_not_an_ack() {
        let mut s = sender();
        let closing = TransportHeader::data(12, "theirs", 9).with_ack(true).with_fin(true);
        assert_eq!(s.on_ack(&closing), AckOutcome::NotMine);
        assert_eq!(s.pending_segment(10).map(|h| h.sequence), Some(10));
        assert!(!s.is_complete());
    }
}
