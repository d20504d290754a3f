//! Cancellable timers keyed by connection.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use super::connection::ConnectionId;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Retransmission of one chunk.
    Retransmit(ConnectionId, u32),
    /// Receiver teardown after inactivity.
    Idle(ConnectionId),
}

impl TimerKey {
    fn connection(&self) -> ConnectionId {
        match *self {
            Self::Retransmit(id, _) | Self::Idle(id) => id,
        }
    }
}

/// Scheduled tasks, at most one per key.
#[derive(Debug, Default)]
pub struct TimerSet {
    handles: Mutex<HashMap<TimerKey, AbortHandle>>,
}

impl TimerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer, aborting whatever was scheduled under `key`.
    pub fn insert(&self, key: TimerKey, handle: AbortHandle) {
        if let Some(previous) = self.handles.lock().insert(key, handle) {
            previous.abort();
        }
    }

    /// Abort the timer under `key`.
    pub fn cancel(&self, key: TimerKey) -> bool {
        match self.handles.lock().remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every timer belonging to `id`.
    pub fn cancel_connection(&self, id: ConnectionId) {
        self.handles.lock().retain(|key, handle| {
            if key.connection() == id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Drop the entry for a timer that has already fired.
    pub fn forget(&self, key: TimerKey) {
        self.handles.lock().remove(&key);
    }

    /// Abort everything.
    pub fn clear(&self) {
        for (_, handle) in self.handles.lock().drain() {
            handle.abort();
        }
    }

    /// Number of scheduled timers.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// True if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> tokio::task::JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_replaces_and_aborts() {
        let timers = TimerSet::new();
        let key = TimerKey::Idle(ConnectionId(1));
        let first = sleeper();
        timers.insert(key, first.abort_handle());
        timers.insert(key, sleeper().abort_handle());

        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(timers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_connection() {
        let timers = TimerSet::new();
        let a = sleeper();
        timers.insert(TimerKey::Retransmit(ConnectionId(1), 4), a.abort_handle());
        timers.insert(TimerKey::Retransmit(ConnectionId(1), 5), sleeper().abort_handle());
        timers.insert(TimerKey::Idle(ConnectionId(2)), sleeper().abort_handle());

        timers.cancel_connection(ConnectionId(1));
        assert!(a.await.unwrap_err().is_cancelled());
        assert_eq!(timers.len(), 1);
        assert!(timers.cancel(TimerKey::Idle(ConnectionId(2))));
        assert!(!timers.cancel(TimerKey::Idle(ConnectionId(2))));
        assert!(timers.is_empty());
    }
}
