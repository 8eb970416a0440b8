//! Per-connection state and process-wide load accounting.
//!
//! Every connection supervisor holds a `ConnectionGuard` for its whole
//! lifetime. The guard keeps the shared active-connection count accurate,
//! and the count in turn drives the adaptive read timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Awaiting or processing a request.
    Active,
    /// Terminal: the socket is about to be closed.
    Closing,
}

/// Read timeout tiers chosen from the number of active connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub relaxed: Duration,
    pub moderate: Duration,
    pub strict: Duration,
    /// Active count at which `moderate` replaces `relaxed`.
    pub moderate_threshold: usize,
    /// Active count at which `strict` replaces `moderate`.
    pub strict_threshold: usize,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            relaxed: Duration::from_secs(20),
            moderate: Duration::from_secs(10),
            strict: Duration::from_secs(5),
            moderate_threshold: 5,
            strict_threshold: 10,
        }
    }
}

impl TimeoutPolicy {
    /// Pick the read timeout for the given number of active connections.
    pub fn timeout_for(&self, active: usize) -> Duration {
        if active < self.moderate_threshold {
            self.relaxed
        } else if active < self.strict_threshold {
            self.moderate
        } else {
            self.strict
        }
    }
}

/// Shared count of connections currently being served.
///
/// Cloning is cheap; all clones observe the same counter.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. The returned guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Number of connections currently being served.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Holds one slot in the active-connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
