//! Link layer: channel framing and medium access.

mod frame;
mod mac;
#[cfg(feature = "socket")]
mod socket;

pub use frame::{FrameDecoder, FrameError, FrameTag, LinkFrame, connect_frame, token_frame};
pub use mac::{Backoff, Mac, MacError, MacWorker};
#[cfg(feature = "socket")]
pub use socket::{ChannelSocket, ChannelSocketBuilder, DEFAULT_CHANNEL_CAPACITY};

use tokio::sync::mpsc;

/// The two directions of a channel connection.
///
/// Whatever sits below the stack (a [`ChannelSocket`] or an in-memory
/// medium in tests) hands one of these to the node.
#[derive(Debug)]
pub struct LinkChannels {
    /// Frames to transmit.
    pub outbound: mpsc::Sender<LinkFrame>,
    /// Frames received from the channel.
    pub inbound: mpsc::Receiver<LinkFrame>,
}

impl LinkChannels {
    /// Bundle an outbound sender with an inbound receiver.
    pub fn new(outbound: mpsc::Sender<LinkFrame>, inbound: mpsc::Receiver<LinkFrame>) -> Self {
        Self { outbound, inbound }
    }
}
