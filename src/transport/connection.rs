//! Connection identity, tuning, and message segmentation.

use std::fmt;
use std::time::Duration;

use crate::core::constants::{
    RECEIVER_IDLE_TIMEOUT, RECEIVER_WINDOW, RETRANSMIT_BASE, RETRANSMIT_STAGGER, SEGMENT_CHARS,
    SEGMENT_MAX_BYTES,
};

/// Identifies one sender or receiver within a transport engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Which side of a transfer a connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Sends one message.
    Sender,
    /// Reassembles one message.
    Receiver,
}

/// Transport timing and window settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Retransmission period.
    pub retransmit_base: Duration,
    /// Extra first-retransmission delay per chunk offset.
    pub retransmit_stagger: Duration,
    /// Sequence numbers reserved past a receiver's first packet.
    pub receiver_window: u32,
    /// Receiver teardown after this long without progress.
    pub receiver_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retransmit_base: RETRANSMIT_BASE,
            retransmit_stagger: RETRANSMIT_STAGGER,
            receiver_window: RECEIVER_WINDOW,
            receiver_idle_timeout: RECEIVER_IDLE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// First retransmission delay for the chunk at `offset` in its message.
    pub fn initial_retransmit_delay(&self, offset: u32) -> Duration {
        self.retransmit_base + self.retransmit_stagger * offset
    }
}

/// Split a message into chunks of at most [`SEGMENT_CHARS`] characters and
/// [`SEGMENT_MAX_BYTES`] bytes, on character boundaries.
pub fn split_message(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chars = 0;
    for c in text.chars() {
        if chars == SEGMENT_CHARS || current.len() + c.len_utf8() > SEGMENT_MAX_BYTES {
            chunks.push(std::mem::take(&mut current));
            chars = 0;
        }
        current.push(c);
        chars += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ascii() {
        let text = "a".repeat(50);
        let chunks = split_message(&text);
        assert_eq!(
            chunks.iter().map(String::len).collect::<Vec<_>>(),
            vec![24, 24, 2]
        );
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_exact_multiple() {
        assert_eq!(split_message(&"b".repeat(48)).len(), 2);
        assert_eq!(split_message("hi"), vec!["hi".to_string()]);
        assert!(split_message("").is_empty());
    }

    #[test]
    fn test_split_multibyte_stays_within_bytes() {
        let text = "é".repeat(20);
        let chunks = split_message(&text);
        assert!(chunks.iter().all(|c| c.len() <= SEGMENT_MAX_BYTES));
        assert_eq!(chunks[0].chars().count(), 12);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_retransmit_stagger() {
        let config = TransportConfig::default();
        assert_eq!(config.initial_retransmit_delay(0), Duration::from_secs(25));
        assert_eq!(config.initial_retransmit_delay(2), Duration::from_secs(29));
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn#7");
    }
}
