//! # meshchat
//!
//! A layered ad-hoc network stack for text chat over a shared, half-duplex
//! broadcast channel:
//!
//! - **Codec**: bit-packed address, transport, distance-vector and dynamic
//!   addressing headers
//! - **Link**: channel framing and CSMA/CA medium access
//! - **Network**: distance-vector routing with route aging, plus conflict
//!   driven dynamic addressing
//! - **Transport**: segmented messages with per-chunk retransmission and
//!   in-order reassembly
//!
//! ## Feature Flags
//!
//! - `socket` (default): TCP adapter to the simulated channel
//!   ([`link::ChannelSocket`])
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types, and layer seams
//! - [`codec`]: Header encoding and decoding
//! - [`link`]: Channel frames and the medium access controller
//! - [`network`]: Router, route table, and dynamic addressing
//! - [`transport`]: Reliable message transport
//! - [`node`]: A complete node wired over one channel
//!
//! ## Example Usage
//!
//! ```rust
//! use meshchat::codec::{AddressHeader, TransportHeader};
//!
//! let segment = TransportHeader::data(1, "hello", 9).with_syn(true).with_fin(true);
//! let frame = AddressHeader::transport(10, 3, 9, segment);
//! let bytes = frame.to_bytes().unwrap();
//!
//! assert_eq!(AddressHeader::from_bytes(&bytes).unwrap(), frame);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod core;
pub mod link;
pub mod network;
pub mod node;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::link::{LinkChannels, LinkFrame};
    #[cfg(feature = "socket")]
    pub use crate::link::{ChannelSocket, ChannelSocketBuilder};
    pub use crate::node::{Node, NodeConfig, NodeConfigBuilder, NodeEvent};
    pub use crate::transport::{ConnectionId, TransportConfig};
}

// Re-export commonly used items at crate root
pub use core::{Address, BROADCAST_ADDRESS, MAX_ADDRESS, NodeError};
pub use node::{Node, NodeConfig, NodeConfigBuilder, NodeEvent};
