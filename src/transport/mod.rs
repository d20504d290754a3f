//! Transport layer: segmented, acknowledged text messages.
//!
//! A message is split into chunks of at most 24 characters, each carried in
//! its own [`TransportHeader`](crate::codec::TransportHeader) with a
//! sequence number from a per-peer allocator. The sending side retransmits
//! every chunk on its own timer until acknowledged; the receiving side
//! reassembles and delivers the message once.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Application (console)          │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   segmentation, acks, retransmission    │
//! ├─────────────────────────────────────────┤
//! │     Network Layer (routing, DV)         │
//! ├─────────────────────────────────────────┤
//! │        Link Layer (CSMA/CA MAC)         │
//! └─────────────────────────────────────────┘
//! ```

mod allocator;
mod connection;
mod engine;
mod receiver;
mod sender;
mod timers;

pub use allocator::SequenceAllocator;
pub use connection::{ConnectionId, ConnectionRole, TransportConfig, split_message};
pub use engine::TransportEngine;
pub use receiver::{ReceiveStep, Receiver};
pub use sender::{AckOutcome, Sender};
pub use timers::{TimerKey, TimerSet};
