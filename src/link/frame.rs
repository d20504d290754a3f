//! Channel framing.
//!
//! Every frame exchanged with the simulated channel starts with a one-byte
//! tag. Data frames continue with a one-byte length and the payload; every
//! other inbound frame is the tag alone.
//!
//! ```text
//! control:   +-----+
//!            | tag |
//!            +-----+
//! data:      +-----+--------+-------------------+
//!            | tag | length | payload (length)  |
//!            +-----+--------+-------------------+
//! ```

use thiserror::Error;
use tracing::warn;

/// Channel frame tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    /// Medium is idle.
    Free = 0x01,
    /// Medium is in use.
    Busy = 0x02,
    /// Long data frame.
    Data = 0x03,
    /// Our own transmission started.
    Sending = 0x04,
    /// Our own transmission finished.
    DoneSending = 0x05,
    /// Short data frame.
    DataShort = 0x06,
    /// Channel is closing the connection.
    End = 0x08,
    /// Connection acknowledged (inbound) or connect request (outbound).
    Hello = 0x09,
    /// Token accepted (inbound) or token submission (outbound).
    TokenAccepted = 0x0A,
    /// Token rejected.
    TokenRejected = 0x0B,
}

impl FrameTag {
    /// Parse a tag from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Free),
            0x02 => Some(Self::Busy),
            0x03 => Some(Self::Data),
            0x04 => Some(Self::Sending),
            0x05 => Some(Self::DoneSending),
            0x06 => Some(Self::DataShort),
            0x08 => Some(Self::End),
            0x09 => Some(Self::Hello),
            0x0A => Some(Self::TokenAccepted),
            0x0B => Some(Self::TokenRejected),
            _ => None,
        }
    }

    /// Convert the tag to its byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// True if frames with this tag carry a length-prefixed payload.
    pub fn has_payload(self) -> bool {
        matches!(self, Self::Data | Self::DataShort)
    }

    /// Medium state this tag signals, if any: `Some(true)` for free.
    pub fn medium_free(self) -> Option<bool> {
        match self {
            Self::Free | Self::DoneSending => Some(true),
            Self::Busy | Self::Sending => Some(false),
            _ => None,
        }
    }
}

/// Errors from channel framing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Unknown tag byte.
    #[error("unknown frame tag: {0:#04x}")]
    UnknownTag(u8),

    /// Frame shorter than its header or declared length.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Payload does not fit the one-byte length field.
    #[error("payload of {0} bytes exceeds 255")]
    PayloadTooLarge(usize),

    /// A data tag used as a control frame or the reverse.
    #[error("tag {0:?} does not match frame shape")]
    ShapeMismatch(FrameTag),
}

/// A frame as exchanged with the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    /// Tag-only frame.
    Control(FrameTag),
    /// Long data frame (address header and nested header).
    Data(Vec<u8>),
    /// Short data frame (dynamic addressing header).
    DataShort(Vec<u8>),
}

impl LinkFrame {
    /// Build a control frame. Fails for data tags.
    pub fn control(tag: FrameTag) -> Result<Self, FrameError> {
        if tag.has_payload() {
            return Err(FrameError::ShapeMismatch(tag));
        }
        Ok(Self::Control(tag))
    }

    /// Frame tag.
    pub fn tag(&self) -> FrameTag {
        match self {
            Self::Control(tag) => *tag,
            Self::Data(_) => FrameTag::Data,
            Self::DataShort(_) => FrameTag::DataShort,
        }
    }

    /// True for data and short data frames.
    pub fn is_data(&self) -> bool {
        !matches!(self, Self::Control(_))
    }

    /// Payload of a data frame.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Control(_) => None,
            Self::Data(p) | Self::DataShort(p) => Some(p),
        }
    }

    /// Serialize for the channel.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Control(tag) => Ok(vec![tag.as_byte()]),
            Self::Data(payload) | Self::DataShort(payload) => {
                let len = u8::try_from(payload.len())
                    .map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
                let mut buf = Vec::with_capacity(2 + payload.len());
                buf.push(self.tag().as_byte());
                buf.push(len);
                buf.extend_from_slice(payload);
                Ok(buf)
            }
        }
    }

    /// Parse one complete frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let (&first, rest) = bytes.split_first().ok_or(FrameError::TooShort {
            expected: 1,
            actual: 0,
        })?;
        let tag = FrameTag::from_byte(first).ok_or(FrameError::UnknownTag(first))?;
        if !tag.has_payload() {
            return Ok(Self::Control(tag));
        }
        let (&len, payload) = rest.split_first().ok_or(FrameError::TooShort {
            expected: 2,
            actual: 1,
        })?;
        let len = usize::from(len);
        if payload.len() < len {
            return Err(FrameError::TooShort {
                expected: 2 + len,
                actual: bytes.len(),
            });
        }
        let payload = payload[..len].to_vec();
        Ok(match tag {
            FrameTag::Data => Self::Data(payload),
            _ => Self::DataShort(payload),
        })
    }
}

/// Connect request: `0x09` followed by the 24-bit big-endian frequency.
pub fn connect_frame(frequency: u32) -> [u8; 4] {
    let f = frequency.to_be_bytes();
    [FrameTag::Hello.as_byte(), f[1], f[2], f[3]]
}

/// Token submission: `0x0A`, token length, token bytes.
pub fn token_frame(token: &str) -> Result<Vec<u8>, FrameError> {
    let bytes = token.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| FrameError::PayloadTooLarge(bytes.len()))?;
    let mut buf = Vec::with_capacity(2 + bytes.len());
    buf.push(FrameTag::TokenAccepted.as_byte());
    buf.push(len);
    buf.extend_from_slice(bytes);
    Ok(buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Tag,
    Length(FrameTag),
    Payload(FrameTag, usize),
}

/// Incremental decoder for the inbound byte stream.
///
/// Bytes may arrive split at any boundary. Unknown tag bytes are skipped
/// with a warning.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    buf: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder waiting for a tag.
    pub fn new() -> Self {
        Self {
            state: DecodeState::Tag,
            buf: Vec::new(),
        }
    }

    /// Feed bytes, returning every frame they complete.
    pub fn feed(&mut self, data: &[u8]) -> Vec<LinkFrame> {
        let mut frames = Vec::new();
        for &byte in data {
            match self.state {
                DecodeState::Tag => match FrameTag::from_byte(byte) {
                    Some(tag) if tag.has_payload() => self.state = DecodeState::Length(tag),
                    Some(tag) => frames.push(LinkFrame::Control(tag)),
                    None => warn!(tag = byte, "skipping unknown frame tag"),
                },
                DecodeState::Length(tag) => {
                    let len = usize::from(byte);
                    self.buf = Vec::with_capacity(len);
                    if len == 0 {
                        frames.push(Self::data(tag, Vec::new()));
                        self.state = DecodeState::Tag;
                    } else {
                        self.state = DecodeState::Payload(tag, len);
                    }
                }
                DecodeState::Payload(tag, len) => {
                    self.buf.push(byte);
                    if self.buf.len() == len {
                        frames.push(Self::data(tag, std::mem::take(&mut self.buf)));
                        self.state = DecodeState::Tag;
                    }
                }
            }
        }
        frames
    }

    /// True if no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Tag
    }

    fn data(tag: FrameTag, payload: Vec<u8>) -> LinkFrame {
        match tag {
            FrameTag::DataShort => LinkFrame::DataShort(payload),
            _ => LinkFrame::Data(payload),
        }
    }
}
