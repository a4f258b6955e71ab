//! Identifiers attached to log lines.
//!
//! Connections get a cheap counter-based id; each request gets a UUID so a
//! single exchange can be followed through the logs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Counter for connection IDs.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique id for an accepted client connection.
///
/// Format: `conn-{counter}` with the counter zero-padded to 16 hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id.
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:016x}", self.0)
    }
}

/// Globally unique id for a single request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
