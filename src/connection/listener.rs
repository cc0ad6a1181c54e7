//! Lifecycle Listener
//!
//! A [`Listener`] is told when a ready connection disconnects. Connections
//! only hold it weakly, so dropping the last strong reference silently
//! stops notifications.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives connection lifecycle events.
pub trait Listener: Send + Sync {
    /// Called once per ready period, before the connection is cleared.
    fn on_disconnect(&self, _id: i16) {}
}

/// Counters shared by every connection of a server.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Disconnects reported by connections
    pub disconnects: AtomicU64,
    /// Total wire bytes read
    pub bytes_read: AtomicU64,
    /// Total wire bytes written
    pub bytes_written: AtomicU64,
}

/// Plain copy of [`ConnectionStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub disconnects: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Never underflow if a close is reported without a matching open.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn bytes_read(&self, count: u32) {
        self.bytes_read.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: u32) {
        self.bytes_written.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl Listener for ConnectionStats {
    fn on_disconnect(&self, _id: i16) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        self.connection_closed();
    }
}
