//! Dynamic address assignment.
//!
//! Each node beacons a HELLO for its own address. A node that hears a HELLO
//! for the address it holds answers with a CONFLICT; the node that receives
//! a CONFLICT for its address moves to a fresh random one. Third-party
//! beacons are flooded onward and keep the sender in the known-node table.
//!
//! Every beacon is deduplicated on `(address, sequence)` for a fixed window,
//! including the ones this node originates, so floods die out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::nodes::random_address;
use super::router::Router;
use crate::codec::{DynamicAddressingHeader, Header};
use crate::core::Address;
use crate::core::constants::PROTOCOL_DYNAMIC_ADDRESSING;
use crate::link::{Mac, MacError};

/// What handling a beacon led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingOutcome {
    /// Already seen inside the dedup window.
    Duplicate,
    /// Someone else claims our address; a CONFLICT was sent.
    ConflictSent,
    /// Our address was contested; we moved.
    AddressChanged {
        /// Previous address.
        old: Address,
        /// New address.
        new: Address,
    },
    /// Third-party beacon, flooded and recorded.
    Flooded,
}

/// Seen `(address, sequence)` pairs with their expiry.
#[derive(Debug, Default)]
struct SeenSequences {
    expires: HashMap<(Address, u8), Instant>,
}

impl SeenSequences {
    /// Record a pair; false if it was already present and unexpired.
    fn insert(&mut self, address: Address, sequence: u8, now: Instant, window: Duration) -> bool {
        self.expires.retain(|_, expiry| *expiry > now);
        if self.expires.contains_key(&(address, sequence)) {
            return false;
        }
        self.expires.insert((address, sequence), now + window);
        true
    }
}

/// Dynamic addressing state machine for one node.
#[derive(Debug)]
pub struct DynamicAddressing {
    router: Arc<Router>,
    mac: Mac,
    seen: Mutex<SeenSequences>,
    window: Duration,
}

impl DynamicAddressing {
    /// Create the state machine. `window` is how long a sequence is
    /// remembered.
    pub fn new(router: Arc<Router>, mac: Mac, window: Duration) -> Self {
        Self {
            router,
            mac,
            seen: Mutex::new(SeenSequences::default()),
            window,
        }
    }

    /// Build a beacon for the local address with a fresh sequence, recorded
    /// so our own flood is not processed again.
    pub fn make_beacon(&self, conflict: bool) -> DynamicAddressingHeader {
        self.make_beacon_at(conflict, Instant::now())
    }

    fn make_beacon_at(&self, conflict: bool, now: Instant) -> DynamicAddressingHeader {
        let address = self.router.local_address();
        let mut seen = self.seen.lock();
        let mut rng = rand::thread_rng();
        let mut sequence: u8 = rng.r#gen();
        // Avoid reusing a live sequence unless all 256 are taken.
        for _ in 0..=u8::MAX {
            if seen.insert(address, sequence, now, self.window) {
                break;
            }
            sequence = sequence.wrapping_add(1);
        }
        DynamicAddressingHeader {
            protocol: PROTOCOL_DYNAMIC_ADDRESSING,
            conflict,
            sequence,
            address,
        }
    }

    /// Send a HELLO for the local address.
    pub fn send_hello(&self) -> Result<(), MacError> {
        let hello = self.make_beacon(false);
        trace!(address = hello.address, seq = hello.sequence, "sending hello");
        self.mac.submit_header(&Header::DynamicAddressing(hello))
    }

    /// Handle an inbound HELLO or CONFLICT.
    pub fn on_beacon(&self, beacon: DynamicAddressingHeader) -> Result<AddressingOutcome, MacError> {
        self.on_beacon_at(beacon, Instant::now())
    }

    fn on_beacon_at(
        &self,
        beacon: DynamicAddressingHeader,
        now: Instant,
    ) -> Result<AddressingOutcome, MacError> {
        if !self
            .seen
            .lock()
            .insert(beacon.address, beacon.sequence, now, self.window)
        {
            trace!(address = beacon.address, seq = beacon.sequence, "duplicate beacon");
            return Ok(AddressingOutcome::Duplicate);
        }

        let local = self.router.local_address();
        if beacon.address != local {
            self.mac.submit_header(&Header::DynamicAddressing(beacon))?;
            self.router.directory().refresh(beacon.address);
            return Ok(AddressingOutcome::Flooded);
        }

        if beacon.conflict {
            let new = random_address(&[beacon.address]);
            let old = self.router.change_local_address(new);
            info!(old, new, "address contested, moved");
            return Ok(AddressingOutcome::AddressChanged { old, new });
        }

        let conflict = self.make_beacon_at(true, now);
        warn!(address = local, "another node claims our address");
        debug!(seq = conflict.sequence, "sending conflict");
        self.mac.submit_header(&Header::DynamicAddressing(conflict))?;
        Ok(AddressingOutcome::ConflictSent)
    }
}
