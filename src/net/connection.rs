//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count active connections per listener
//! - Mirror the count into the `mqtt_proxy_active_connections` gauge

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks active connections for one listener.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Listener label used in logs and metrics.
    listener: &'static str,
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new(listener: &'static str) -> Self {
        Self {
            listener,
            active_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened(self.listener);
        ConnectionGuard {
            listener: self.listener,
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn listener(&self) -> &'static str {
        self.listener
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    listener: &'static str,
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed(self.listener);
        tracing::trace!(connection_id = %self.id, listener = self.listener, "Connection closed");
    }
}
