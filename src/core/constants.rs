//! Protocol constants.
//!
//! Wire widths and addressing values are fixed by the frame layouts and MUST
//! NOT be changed. Timing values are the defaults picked up by
//! [`NodeConfig`](crate::node::NodeConfig).

use std::time::Duration;

/// A node address (4 bits on the wire).
pub type Address = u8;

// =============================================================================
// ADDRESSING
// =============================================================================

/// Reserved destination meaning "all reachable nodes".
pub const BROADCAST_ADDRESS: Address = 7;

/// Highest address representable in 4 bits.
pub const MAX_ADDRESS: Address = 15;

// =============================================================================
// HEADER PROTOCOL IDS
// =============================================================================

/// `nextProtocol` value for a nested transport header.
pub const PROTOCOL_TRANSPORT: u8 = 0;

/// `nextProtocol` value for a nested distance-vector header.
pub const PROTOCOL_DISTANCE_VECTOR: u8 = 2;

/// `protocol` value carried by HELLO and CONFLICT frames.
pub const PROTOCOL_DYNAMIC_ADDRESSING: u8 = 0;

// =============================================================================
// FIELD WIDTHS (bits)
// =============================================================================

/// Width of an address field.
pub const ADDRESS_BITS: u8 = 4;

/// Width of the transport sequence number.
pub const SEQUENCE_BITS: u8 = 23;

/// Width of the transport payload length.
pub const SEGMENT_LENGTH_BITS: u8 = 6;

/// Size of the sequence number space.
pub const SEQUENCE_SPACE: u32 = 1 << SEQUENCE_BITS;

/// Largest message payload a transport header can describe.
pub const MAX_SEGMENT_PAYLOAD: usize = (1 << SEGMENT_LENGTH_BITS) - 1;

// =============================================================================
// FRAME SIZES (bytes)
// =============================================================================

/// Address header size.
pub const ADDRESS_HEADER_SIZE: usize = 4;

/// Fixed part of the transport header.
pub const TRANSPORT_HEADER_SIZE: usize = 4;

/// Dynamic addressing frame size.
pub const SHORT_FRAME_SIZE: usize = 2;

/// Size the channel pads long frames to.
pub const LONG_FRAME_SIZE: usize = 32;

/// Maximum characters per message chunk.
pub const SEGMENT_CHARS: usize = 24;

/// Maximum UTF-8 bytes per message chunk, so a long frame stays within
/// [`LONG_FRAME_SIZE`].
pub const SEGMENT_MAX_BYTES: usize = LONG_FRAME_SIZE - ADDRESS_HEADER_SIZE - TRANSPORT_HEADER_SIZE;

// =============================================================================
// ROUTING
// =============================================================================

/// Route cost treated as unreachable.
pub const INFINITY: u8 = 8;

/// Hop budget of an originated transport frame.
pub const DEFAULT_PACKET_TTL: u8 = 10;

/// Hop budget of an advertisement (direct neighbors only).
pub const ADVERTISEMENT_TTL: u8 = 1;

/// Route lifetimes, in ticks, per advertisement interval.
pub const ROUTE_TTL_INTERVALS: u32 = 4;

/// Distance-vector advertisement period.
pub const ADVERTISEMENT_INTERVAL: Duration = Duration::from_secs(60);

/// Route aging tick.
pub const ROUTE_TICK: Duration = Duration::from_secs(1);

/// Delay before the first advertisement after startup.
pub const ADVERTISEMENT_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// DYNAMIC ADDRESSING
// =============================================================================

/// HELLO beacon period.
pub const HELLO_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before the first HELLO after startup.
pub const HELLO_DELAY: Duration = Duration::from_secs(1);

/// How long a (address, sequence) pair is remembered for deduplication.
pub const SEQUENCE_EXPIRY: Duration = Duration::from_secs(120);

/// Liveness counter given to a node on every HELLO from it.
pub const KNOWN_NODE_TTL: u32 = 60;

/// Period of the known-node liveness decay.
pub const KNOWN_NODE_DECAY: Duration = Duration::from_secs(3);

/// Delay before the first liveness decay after startup.
pub const KNOWN_NODE_DECAY_DELAY: Duration = Duration::from_secs(10);

// =============================================================================
// MEDIUM ACCESS
// =============================================================================

/// Backoff slot length.
pub const BACKOFF_SLOT: Duration = Duration::from_millis(100);

/// Backoff slot range, `[min, max)` (1.0s to 3.0s).
pub const BACKOFF_SLOTS: std::ops::Range<u32> = 10..30;

// =============================================================================
// TRANSPORT
// =============================================================================

/// Base retransmission interval.
pub const RETRANSMIT_BASE: Duration = Duration::from_secs(25);

/// Extra initial delay per chunk offset within a message.
pub const RETRANSMIT_STAGGER: Duration = Duration::from_secs(2);

/// Sequence numbers a receiver reserves for an unknown-length message.
pub const RECEIVER_WINDOW: u32 = 40;

/// Receiver teardown after this long without a state change.
pub const RECEIVER_IDLE_TIMEOUT: Duration = Duration::from_secs(100);

// =============================================================================
// QUEUES
// =============================================================================

/// Default capacity of the medium access send queue.
pub const MAC_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the node event channel.
pub const EVENT_CAPACITY: usize = 256;
