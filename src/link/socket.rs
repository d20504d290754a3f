//! TCP adapter to the simulated channel.
//!
//! Connects to the channel server, performs the connect/token exchange, and
//! bridges the byte stream to a pair of [`LinkFrame`] queues.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::LinkChannels;
use super::frame::{FrameDecoder, LinkFrame, connect_frame, token_frame};

/// Default queue capacity in each direction.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 1024;

/// A live connection to the channel server.
///
/// Dropping it stops the reader and writer tasks.
#[derive(Debug)]
pub struct ChannelSocket {
    peer: SocketAddr,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ChannelSocket {
    /// Connect with default options.
    pub async fn connect(
        addr: SocketAddr,
        frequency: u32,
        token: &str,
    ) -> io::Result<(Self, LinkChannels)> {
        ChannelSocketBuilder::new(frequency, token).connect(addr).await
    }

    /// Channel server address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// True once both directions have stopped.
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }
}

impl Drop for ChannelSocket {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Builder for [`ChannelSocket`].
#[derive(Debug, Clone)]
pub struct ChannelSocketBuilder {
    frequency: u32,
    token: String,
    capacity: usize,
}

impl ChannelSocketBuilder {
    /// Start a builder for the given frequency and access token.
    pub fn new(frequency: u32, token: impl Into<String>) -> Self {
        Self {
            frequency,
            token: token.into(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the queue capacity in each direction.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Connect, send the setup frames, and start the bridge tasks.
    pub async fn connect(self, addr: SocketAddr) -> io::Result<(ChannelSocket, LinkChannels)> {
        let token = token_frame(&self.token)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&connect_frame(self.frequency)).await?;
        stream.write_all(&token).await?;
        debug!(%addr, frequency = self.frequency, "connected to channel");

        let (read_half, write_half) = stream.into_split();
        let (in_tx, in_rx) = mpsc::channel(self.capacity);
        let (out_tx, out_rx) = mpsc::channel(self.capacity);

        let socket = ChannelSocket {
            peer: addr,
            reader: tokio::spawn(read_loop(read_half, in_tx)),
            writer: tokio::spawn(write_loop(write_half, out_rx)),
        };
        Ok((socket, LinkChannels::new(out_tx, in_rx)))
    }
}

async fn read_loop(mut stream: OwnedReadHalf, inbound: mpsc::Sender<LinkFrame>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("channel closed the connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "channel read failed");
                return;
            }
        };
        for frame in decoder.feed(&buf[..n]) {
            if inbound.send(frame).await.is_err() {
                return;
            }
        }
    }
}

async fn write_loop(mut stream: OwnedWriteHalf, mut outbound: mpsc::Receiver<LinkFrame>) {
    while let Some(frame) = outbound.recv().await {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "dropping unencodable frame");
                continue;
            }
        };
        if let Err(e) = stream.write_all(&bytes).await {
            warn!(error = %e, "channel write failed");
            return;
        }
    }
}
