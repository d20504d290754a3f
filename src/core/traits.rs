//! Seams between the layers.
//!
//! The transport engine talks to the network layer only through
//! [`SegmentLink`] and hands messages up through [`MessageSink`], which
//! keeps it testable without a router or a medium.

use super::constants::Address;
use super::error::RoutingError;
use crate::codec::TransportHeader;

/// Downward interface the transport engine needs from the network layer.
pub trait SegmentLink: Send + Sync + 'static {
    /// Wrap a transport segment in an address header and hand it to the MAC.
    ///
    /// Returns [`RoutingError::NoRoute`] when the destination is unknown; the
    /// transport treats that as a silent drop and relies on its own
    /// retransmission timers.
    fn send_segment(&self, segment: TransportHeader) -> Result<(), RoutingError>;

    /// Addresses currently considered alive, used to fan out broadcasts.
    fn known_peers(&self) -> Vec<Address>;
}

/// Upward interface for reassembled messages.
pub trait MessageSink: Send + Sync + 'static {
    /// Hand a complete message from `source` to the application.
    fn deliver_message(&self, text: String, source: Address);
}
