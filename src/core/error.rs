//! Error types shared across the stack.

use thiserror::Error;

use super::constants::Address;
use crate::link::{FrameError, MacError};

/// Errors raised while encoding or decoding a header.
///
/// Always recoverable: only the frame being built or parsed is abandoned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Bit string cannot be packed into whole bytes.
    #[error("bit string of {0} bits is not a multiple of 8")]
    BitLength(usize),

    /// A field value does not fit its bit width.
    #[error("{field} value {value} exceeds {bits}-bit width")]
    FieldOutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u32,
        /// Field width in bits.
        bits: u8,
    },

    /// A distance vector must carry at least one entry.
    #[error("distance vector has no entries")]
    EmptyDistanceVector,

    /// Input ended before the header was complete.
    #[error("truncated header: needed {expected} bits, {actual} available")]
    Truncated {
        /// Bits required.
        expected: usize,
        /// Bits available.
        actual: usize,
    },

    /// Transport payload is not valid UTF-8.
    #[error("transport payload is not valid UTF-8")]
    InvalidUtf8,

    /// The address header names a nested protocol this stack does not speak.
    #[error("unknown nested protocol id {0}")]
    UnknownProtocol(u8),

    /// A unicast frame names the broadcast address, which would decode as a
    /// broadcast.
    #[error("unicast frame addressed to the broadcast address")]
    UnicastToBroadcast,

    /// A long frame is missing its nested header.
    #[error("address header carries no nested header")]
    MissingUpperHeader,
}

/// Errors from the routing layer.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// No route to the destination. Callers drop the packet silently.
    #[error("no route to {0}")]
    NoRoute(Address),

    /// The frame could not be encoded.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// The medium access layer refused the frame.
    #[error("mac error: {0}")]
    Mac(#[from] MacError),
}

impl RoutingError {
    /// Check if this error means the packet was dropped for lack of a route.
    pub fn is_no_route(&self) -> bool {
        matches!(self, RoutingError::NoRoute(_))
    }
}

/// Errors from the transport layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing to send.
    #[error("message is empty")]
    EmptyMessage,

    /// Destination is not a 4-bit address.
    #[error("invalid destination {0}")]
    InvalidDestination(Address),

    /// No contiguous block of sequence numbers left toward this peer.
    #[error("sequence space toward {0} exhausted")]
    SequenceSpaceExhausted(Address),
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Payload error.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Channel framing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Routing error.
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Medium access error.
    #[error("mac error: {0}")]
    Mac(#[from] MacError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
