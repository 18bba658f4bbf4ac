// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of sockets currently open, in any phase.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("worldgate_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of sessions that completed login and are in the play phase.
    pub static ref ONLINE_PLAYERS: Gauge =
        register_gauge!("worldgate_online_players", "Number of players in the play phase.").unwrap();


    // --- Server-wide Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("worldgate_connections_received_total", "Total number of connections received.").unwrap();
    pub static ref STATUS_REQUESTS_TOTAL: Counter =
        register_counter!("worldgate_status_requests_total", "Total number of server-list status requests answered.").unwrap();
    pub static ref LOGINS_COMPLETED_TOTAL: Counter =
        register_counter!("worldgate_logins_completed_total", "Total number of logins handed off to the play phase.").unwrap();
    /// Failed logins, labeled by failure kind.
    pub static ref LOGIN_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("worldgate_login_failures_total", "Total number of failed logins, labeled by reason.", &["reason"]).unwrap();
    pub static ref THROTTLED_CONNECTIONS_TOTAL: Counter =
        register_counter!("worldgate_throttled_connections_total", "Total number of login attempts rejected by the throttle.").unwrap();
    /// Failures that suggest tampering, such as a verify token mismatch.
    pub static ref SECURITY_EVENTS_TOTAL: CounterVec =
        register_counter_vec!("worldgate_security_events_total", "Total number of security events, labeled by kind.", &["kind"]).unwrap();


    // --- Histograms ---
    /// Wall-clock time spent waiting on the identity authority.
    pub static ref IDENTITY_RESOLUTION_SECONDS: Histogram =
        register_histogram!("worldgate_identity_resolution_seconds", "Latency of identity resolution in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
