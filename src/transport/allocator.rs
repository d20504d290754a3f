//! Per-peer sequence number bookkeeping.
//!
//! Senders allocate contiguous blocks past the highest number ever handed
//! out toward a peer, so a number is never reused for a later message.
//! Receivers reserve their window in the same set so a concurrent sender to
//! that peer never lands inside it. Released numbers leave the in-use set
//! but not the high-water mark.

use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;

use parking_lot::Mutex;

use crate::core::constants::SEQUENCE_SPACE;
use crate::core::{Address, TransportError};

#[derive(Debug, Default)]
struct PeerSequences {
    used: BTreeSet<u32>,
    /// Highest number ever allocated or reserved.
    high: u32,
}

/// Sequence numbers in use, per peer.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    peers: Mutex<HashMap<Address, PeerSequences>>,
}

impl SequenceAllocator {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `count` consecutive numbers starting one past the highest
    /// ever used toward `peer` (numbering starts at 1).
    pub fn allocate_block(&self, peer: Address, count: u32) -> Result<u32, TransportError> {
        let mut peers = self.peers.lock();
        let entry = peers.entry(peer).or_default();
        let first = entry.high + 1;
        let end = first
            .checked_add(count)
            .filter(|&end| end <= SEQUENCE_SPACE)
            .ok_or(TransportError::SequenceSpaceExhausted(peer))?;
        entry.used.extend(first..end);
        entry.high = entry.high.max(end - 1);
        Ok(first)
    }

    /// Mark a range as in use and return the numbers that were free before
    /// the call. Numbers outside the sequence space are ignored.
    pub fn reserve(&self, peer: Address, range: RangeInclusive<u32>) -> BTreeSet<u32> {
        let (start, end) = range.into_inner();
        let end = end.min(SEQUENCE_SPACE - 1);
        if start > end {
            return BTreeSet::new();
        }
        let mut peers = self.peers.lock();
        let entry = peers.entry(peer).or_default();
        entry.high = entry.high.max(end);
        (start..=end).filter(|&seq| entry.used.insert(seq)).collect()
    }

    /// Return numbers to the pool.
    pub fn release(&self, peer: Address, sequences: impl IntoIterator<Item = u32>) {
        if let Some(entry) = self.peers.lock().get_mut(&peer) {
            for seq in sequences {
                entry.used.remove(&seq);
            }
        }
    }

    /// Highest number in use toward `peer` that is below `seq`.
    pub fn highest_below(&self, peer: Address, seq: u32) -> Option<u32> {
        self.peers
            .lock()
            .get(&peer)
            .and_then(|entry| entry.used.range(..seq).next_back().copied())
    }

    /// True if `seq` is in use toward `peer`.
    pub fn is_used(&self, peer: Address, seq: u32) -> bool {
        self.peers
            .lock()
            .get(&peer)
            .is_some_and(|entry| entry.used.contains(&seq))
    }

    /// Count of numbers in use toward `peer`.
    pub fn used_count(&self, peer: Address) -> usize {
        self.peers.lock().get(&peer).map_or(0, |entry| entry.used.len())
    }
}
