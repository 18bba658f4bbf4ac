// src/core/state/stats.rs

//! Contains state definitions and logic for server statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Holds all state and logic related to server-wide statistics and monitoring.
#[derive(Debug)]
pub struct StatsState {
    /// The total number of connections accepted by the server since startup.
    total_connections: AtomicU64,
    /// Logins that reached the play phase.
    total_logins: AtomicU64,
    total_status_requests: AtomicU64,
}

impl Default for StatsState {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsState {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            total_logins: AtomicU64::new(0),
            total_status_requests: AtomicU64::new(0),
        }
    }

    pub fn increment_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn increment_total_logins(&self) {
        self.total_logins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_logins(&self) -> u64 {
        self.total_logins.load(Ordering::Relaxed)
    }

    pub fn increment_status_requests(&self) {
        self.total_status_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_status_requests(&self) -> u64 {
        self.total_status_requests.load(Ordering::Relaxed)
    }
}
