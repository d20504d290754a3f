//! Distance-vector router.
//!
//! Originates transport frames, forwards frames addressed through this node,
//! hands local segments up, and exchanges advertisements with neighbors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, trace, warn};

use super::nodes::NodeDirectory;
use super::routing::{RouteEntry, RouteTable};
use crate::codec::{AddressHeader, DistanceVectorHeader, Header, Routing, TransportHeader, UpperHeader};
use crate::core::constants::ADVERTISEMENT_TTL;
use crate::core::{Address, RoutingError, SegmentLink};
use crate::link::Mac;

/// What the router did with an inbound long frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Segment for this node, to be handed to the transport.
    Deliver {
        /// Originating node.
        source: Address,
        /// The segment.
        segment: TransportHeader,
    },
    /// Relayed toward its destination.
    Forwarded {
        /// Neighbor it was relayed to.
        next_hop: Address,
    },
    /// Advertisement applied.
    Advertisement {
        /// True if the table changed or a route reached infinity; either
        /// way the table was re-advertised.
        changed: bool,
    },
    /// Dropped without error.
    Dropped(DropReason),
}

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Another node is the designated next hop.
    NotNextHop,
    /// Hop budget exhausted.
    TtlExpired,
    /// No route toward the destination.
    NoRoute,
    /// A broadcast transport frame; those are never relayed.
    Broadcast,
}

/// The network layer of one node.
#[derive(Debug)]
pub struct Router {
    directory: Arc<NodeDirectory>,
    table: RouteTable,
    mac: Mac,
    packet_ttl: u8,
    broadcast_id: AtomicU8,
}

impl Router {
    /// Create a router. The table starts with the self-route for the
    /// directory's current address.
    pub fn new(directory: Arc<NodeDirectory>, mac: Mac, route_ttl: u32, packet_ttl: u8) -> Self {
        let table = RouteTable::new(directory.local_address(), route_ttl);
        Self {
            directory,
            table,
            mac,
            packet_ttl,
            broadcast_id: AtomicU8::new(0),
        }
    }

    /// The route table.
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// The node directory.
    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    /// Current local address.
    pub fn local_address(&self) -> Address {
        self.directory.local_address()
    }

    /// Wrap a segment in an address header and submit it.
    ///
    /// Fails with [`RoutingError::NoRoute`] if the destination is not in the
    /// table.
    pub fn originate(&self, segment: TransportHeader) -> Result<(), RoutingError> {
        let destination = segment.destination;
        let route = self
            .table
            .lookup(destination)
            .ok_or(RoutingError::NoRoute(destination))?;
        let header = AddressHeader::transport(
            self.packet_ttl,
            self.local_address(),
            route.next_hop,
            segment,
        );
        self.mac.submit_header(&Header::Address(header))?;
        Ok(())
    }

    /// Process an inbound long frame.
    pub fn on_packet(&self, header: AddressHeader) -> Result<PacketOutcome, RoutingError> {
        let source = header.source;
        match header.upper {
            UpperHeader::Transport(segment) => {
                self.on_transport(source, header.ttl, header.routing, segment)
            }
            UpperHeader::DistanceVector(vector) => self.on_advertisement(source, &vector),
        }
    }

    fn on_transport(
        &self,
        source: Address,
        ttl: u8,
        routing: Routing,
        segment: TransportHeader,
    ) -> Result<PacketOutcome, RoutingError> {
        let local = self.local_address();
        let Routing::Unicast { destination, next_hop } = routing else {
            return Ok(PacketOutcome::Dropped(DropReason::Broadcast));
        };
        if destination == local {
            return Ok(PacketOutcome::Deliver { source, segment });
        }
        if next_hop != local {
            trace!(source, destination, next_hop, "not the next hop, dropping");
            return Ok(PacketOutcome::Dropped(DropReason::NotNextHop));
        }
        let ttl = ttl.saturating_sub(1);
        if ttl == 0 {
            debug!(source, destination, "hop budget exhausted, dropping");
            return Ok(PacketOutcome::Dropped(DropReason::TtlExpired));
        }
        let Some(route) = self.table.lookup(destination) else {
            debug!(source, destination, "no route to forward, dropping");
            return Ok(PacketOutcome::Dropped(DropReason::NoRoute));
        };

        let forwarded = AddressHeader {
            ttl,
            source,
            routing: Routing::Unicast {
                destination,
                next_hop: route.next_hop,
            },
            upper: UpperHeader::Transport(segment),
        };
        self.mac.submit_header(&Header::Address(forwarded))?;
        trace!(source, destination, next_hop = route.next_hop, ttl, "forwarded");
        Ok(PacketOutcome::Forwarded {
            next_hop: route.next_hop,
        })
    }

    fn on_advertisement(
        &self,
        neighbor: Address,
        vector: &DistanceVectorHeader,
    ) -> Result<PacketOutcome, RoutingError> {
        let outcome = self
            .table
            .apply_advertisement(neighbor, vector, self.local_address());
        if !outcome.evicted.is_empty() {
            debug!(neighbor, evicted = ?outcome.evicted, "routes reached infinity");
        }
        let changed = outcome.changed || !outcome.evicted.is_empty();
        if changed {
            debug!(neighbor, updated = ?outcome.updated, "route table changed");
            self.advertise()?;
        }
        Ok(PacketOutcome::Advertisement { changed })
    }

    /// Broadcast the table to direct neighbors.
    pub fn advertise(&self) -> Result<(), RoutingError> {
        let id = self.next_broadcast_id();
        let header = AddressHeader::advertisement(
            ADVERTISEMENT_TTL,
            self.local_address(),
            id,
            self.table.vector(),
        );
        self.mac.submit_header(&Header::Address(header))?;
        trace!(id, "advertisement queued");
        Ok(())
    }

    /// Broadcast, logging instead of failing.
    pub(crate) fn advertise_or_log(&self) {
        if let Err(e) = self.advertise() {
            warn!(error = %e, "advertisement skipped this round");
        }
    }

    /// Age routes by one tick; advertise if anything expired.
    pub fn tick(&self) -> Vec<Address> {
        let expired = self.table.age();
        if !expired.is_empty() {
            debug!(?expired, "routes expired");
            self.advertise_or_log();
        }
        expired
    }

    /// Remove the route to `destination` and advertise.
    ///
    /// The local address is never removed. Returns true if a route was
    /// removed.
    pub fn remove_route(&self, destination: Address) -> bool {
        if destination == self.local_address() {
            return false;
        }
        let removed = self.table.remove(destination).is_some();
        if removed {
            debug!(destination, "route removed");
            self.advertise_or_log();
        }
        removed
    }

    /// Adopt a new local address: install its self-route, drop the old one,
    /// and advertise. Returns the old address.
    pub fn change_local_address(&self, new: Address) -> Address {
        let old = self.directory.set_local_address(new);
        self.table.replace_self(old, new);
        self.advertise_or_log();
        old
    }

    /// Forget a node whose liveness expired, along with its route.
    pub fn forget_node(&self, address: Address) {
        self.directory.forget(address);
        self.remove_route(address);
    }

    /// Known nodes that currently have a route.
    pub fn reachable_nodes(&self) -> Vec<Address> {
        self.directory
            .known_nodes()
            .into_iter()
            .filter(|&a| self.table.contains(a))
            .collect()
    }

    /// Route to `destination`, if any.
    pub fn route(&self, destination: Address) -> Option<RouteEntry> {
        self.table.lookup(destination)
    }

    fn next_broadcast_id(&self) -> u8 {
        self.broadcast_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

impl SegmentLink for Router {
    fn send_segment(&self, segment: TransportHeader) -> Result<(), RoutingError> {
        self.originate(segment)
    }

    fn known_peers(&self) -> Vec<Address> {
        self.directory.known_nodes()
    }
}
