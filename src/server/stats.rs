//! Server-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics shared by the listener, the dispatcher and every connection.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently registered connections
    pub active_connections: AtomicU64,
    /// Requests handed to the backend
    pub requests_submitted: AtomicU64,
    /// Completions delivered to a live connection
    pub requests_completed: AtomicU64,
    /// Completions that arrived after their connection was gone
    pub late_completions: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn late_completion(&self) {
        self.late_completions.fetch_add(1, Ordering::Relaxed);
    }
}
