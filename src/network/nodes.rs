//! Local address and known-node liveness.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;

use crate::core::{Address, BROADCAST_ADDRESS, MAX_ADDRESS};

/// Pick a random address, never the broadcast address nor any in `excluding`.
pub fn random_address(excluding: &[Address]) -> Address {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = rng.gen_range(0..=MAX_ADDRESS);
        if candidate != BROADCAST_ADDRESS && !excluding.contains(&candidate) {
            return candidate;
        }
    }
}

#[derive(Debug)]
struct DirectoryState {
    local: Address,
    known: HashMap<Address, u32>,
}

/// This node's address plus the nodes it has heard from recently.
///
/// A known node carries a liveness counter that is reset on every beacon
/// naming it and decays on a timer; it is forgotten when the counter hits
/// zero. Liveness is independent of route cost.
#[derive(Debug)]
pub struct NodeDirectory {
    state: Mutex<DirectoryState>,
    liveness: u32,
}

impl NodeDirectory {
    /// Create a directory for `local` with the given liveness counter.
    pub fn new(local: Address, liveness: u32) -> Self {
        Self {
            state: Mutex::new(DirectoryState {
                local,
                known: HashMap::new(),
            }),
            liveness,
        }
    }

    /// Current local address.
    pub fn local_address(&self) -> Address {
        self.state.lock().local
    }

    /// Replace the local address, returning the old one.
    pub fn set_local_address(&self, address: Address) -> Address {
        let mut state = self.state.lock();
        let old = state.local;
        state.local = address;
        state.known.remove(&address);
        old
    }

    /// Mark `address` alive. The local address is never recorded.
    pub fn refresh(&self, address: Address) {
        let mut state = self.state.lock();
        if address != state.local {
            state.known.insert(address, self.liveness);
        }
    }

    /// Decrement every counter and return the nodes that just expired.
    pub fn decay(&self) -> Vec<Address> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();
        state.known.retain(|&address, ttl| {
            *ttl = ttl.saturating_sub(1);
            if *ttl == 0 {
                expired.push(address);
                false
            } else {
                true
            }
        });
        expired.sort_unstable();
        expired
    }

    /// Drop a node immediately.
    pub fn forget(&self, address: Address) -> bool {
        self.state.lock().known.remove(&address).is_some()
    }

    /// True if `address` is currently known.
    pub fn is_known(&self, address: Address) -> bool {
        self.state.lock().known.contains_key(&address)
    }

    /// Known addresses, ascending.
    pub fn known_nodes(&self) -> Vec<Address> {
        let mut nodes: Vec<_> = self.state.lock().known.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_address_exclusions() {
        for _ in 0..200 {
            let a = random_address(&[3]);
            assert!(a <= MAX_ADDRESS);
            assert_ne!(a, BROADCAST_ADDRESS);
            assert_ne!(a, 3);
        }
    }

    #[test]
    fn test_refresh_and_decay() {
        let dir = NodeDirectory::new(1, 2);
        dir.refresh(4);
        dir.refresh(9);
        dir.refresh(1);
        assert_eq!(dir.known_nodes(), vec![4, 9]);

        assert!(dir.decay().is_empty());
        dir.refresh(9);
        assert_eq!(dir.decay(), vec![4]);
        assert_eq!(dir.known_nodes(), vec![9]);
        assert_eq!(dir.decay(), vec![9]);
        assert!(dir.known_nodes().is_empty());
    }

    #[test]
    fn test_set_local_address() {
        let dir = NodeDirectory::new(3, 60);
        dir.refresh(5);
        assert_eq!(dir.set_local_address(5), 3);
        assert_eq!(dir.local_address(), 5);
        assert!(!dir.is_known(5));
        assert!(!dir.forget(5));
    }
}
