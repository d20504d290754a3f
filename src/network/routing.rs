//! Distance-vector route table.
//!
//! All read-modify-write sequences run under one lock, so two advertisements
//! processed concurrently can never interleave their comparisons and
//! updates.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::codec::DistanceVectorHeader;
use crate::core::Address;
use crate::core::constants::INFINITY;

/// A route to one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Neighbor to send through.
    pub next_hop: Address,
    /// Hop cost.
    pub cost: u8,
    /// Remaining lifetime in ticks.
    pub ttl: u32,
    /// Route to this node itself; never ages or expires.
    pub self_route: bool,
}

impl RouteEntry {
    fn learned(next_hop: Address, cost: u8, ttl: u32) -> Self {
        Self {
            next_hop,
            cost,
            ttl,
            self_route: false,
        }
    }

    fn local(address: Address, ttl: u32) -> Self {
        Self {
            next_hop: address,
            cost: 0,
            ttl,
            self_route: true,
        }
    }
}

/// What an advertisement did to the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementOutcome {
    /// Destinations whose route was installed or replaced.
    pub updated: Vec<Address>,
    /// Destinations evicted for reaching [`INFINITY`].
    pub evicted: Vec<Address>,
    /// True if any destination's next hop or cost differs from before.
    ///
    /// A destination installed and evicted in the same pass leaves this
    /// false but still shows up in `evicted`.
    pub changed: bool,
}

/// Destination to route, at most one entry each.
#[derive(Debug)]
pub struct RouteTable {
    routes: Mutex<HashMap<Address, RouteEntry>>,
    route_ttl: u32,
}

impl RouteTable {
    /// Create a table holding only the self-route for `local`.
    pub fn new(local: Address, route_ttl: u32) -> Self {
        let mut routes = HashMap::new();
        routes.insert(local, RouteEntry::local(local, route_ttl));
        Self {
            routes: Mutex::new(routes),
            route_ttl: route_ttl.max(1),
        }
    }

    /// Lifetime given to a fresh or refreshed route.
    pub fn route_ttl(&self) -> u32 {
        self.route_ttl
    }

    /// Route to `destination`, if any.
    pub fn lookup(&self, destination: Address) -> Option<RouteEntry> {
        self.routes.lock().get(&destination).copied()
    }

    /// True if a route to `destination` exists.
    pub fn contains(&self, destination: Address) -> bool {
        self.routes.lock().contains_key(&destination)
    }

    /// Copy of the whole table, ordered by destination.
    pub fn snapshot(&self) -> BTreeMap<Address, RouteEntry> {
        self.routes.lock().iter().map(|(&d, &e)| (d, e)).collect()
    }

    /// The table as an advertisement body.
    pub fn vector(&self) -> DistanceVectorHeader {
        DistanceVectorHeader::new(self.routes.lock().iter().map(|(&d, e)| (d, e.cost)))
    }

    /// Move the self-route from `old` to `new`.
    pub fn replace_self(&self, old: Address, new: Address) {
        let mut routes = self.routes.lock();
        routes.insert(new, RouteEntry::local(new, self.route_ttl));
        if old != new {
            routes.remove(&old);
        }
    }

    /// Remove a learned route. Self-routes are never removed.
    pub fn remove(&self, destination: Address) -> Option<RouteEntry> {
        let mut routes = self.routes.lock();
        match routes.get(&destination) {
            Some(entry) if !entry.self_route => routes.remove(&destination),
            _ => None,
        }
    }

    /// Apply an advertisement heard from `neighbor`.
    ///
    /// First every entry that already routes through `neighbor` at exactly
    /// the advertised cost plus one gets its lifetime refreshed. Then each
    /// advertised destination other than `local` is installed if missing,
    /// replaced if it goes through `neighbor` at a different cost, or
    /// switched to `neighbor` if that is strictly cheaper. Any resulting
    /// route at or above [`INFINITY`] is evicted.
    pub fn apply_advertisement(
        &self,
        neighbor: Address,
        vector: &DistanceVectorHeader,
        local: Address,
    ) -> AdvertisementOutcome {
        let mut routes = self.routes.lock();
        let before: HashMap<Address, (Address, u8)> =
            routes.iter().map(|(&d, e)| (d, (e.next_hop, e.cost))).collect();

        for (&destination, &advertised) in vector.entries() {
            if let Some(entry) = routes.get_mut(&destination) {
                if !entry.self_route
                    && entry.next_hop == neighbor
                    && u16::from(entry.cost) == u16::from(advertised) + 1
                {
                    entry.ttl = self.route_ttl;
                }
            }
        }

        let mut outcome = AdvertisementOutcome::default();
        for (&destination, &advertised) in vector.entries() {
            if destination == local {
                continue;
            }
            let total = advertised.saturating_add(1);
            let replace = match routes.get(&destination) {
                None => true,
                Some(current) if current.self_route => false,
                Some(current) if current.next_hop == neighbor => current.cost != total,
                Some(current) => total < current.cost,
            };
            if replace {
                routes.insert(destination, RouteEntry::learned(neighbor, total, self.route_ttl));
                outcome.updated.push(destination);
            }

            if let Some(entry) = routes.get(&destination) {
                if !entry.self_route && entry.cost >= INFINITY {
                    routes.remove(&destination);
                    outcome.evicted.push(destination);
                }
            }
        }

        outcome.changed = routes.len() != before.len()
            || routes
                .iter()
                .any(|(d, e)| before.get(d) != Some(&(e.next_hop, e.cost)));
        outcome
    }

    /// Age every learned route by one tick.
    ///
    /// Cost grows by one each time the lifetime sits exactly on
    /// `route_ttl / k` for `k` in `2..=6`; coinciding checkpoints each count.
    /// Routes whose lifetime reaches zero are removed and returned.
    pub fn age(&self) -> Vec<Address> {
        let checkpoints: Vec<u32> = (2..=6).map(|k| self.route_ttl / k).collect();
        let mut routes = self.routes.lock();
        let mut expired = Vec::new();
        for (&destination, entry) in routes.iter_mut() {
            if entry.self_route {
                continue;
            }
            let bumps = checkpoints.iter().filter(|&&c| c == entry.ttl).count();
            entry.cost = entry.cost.saturating_add(bumps as u8);
            entry.ttl = entry.ttl.saturating_sub(1);
            if entry.ttl == 0 {
                expired.push(destination);
            }
        }
        for destination in &expired {
            routes.remove(destination);
        }
        expired.sort_unstable();
        expired
    }
}
