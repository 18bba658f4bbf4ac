// src/core/throttle.rs

//! Per-address login rate limiting.
//!
//! The guard is the one piece of state shared across connections. Entries live in a
//! `DashMap` so concurrent logins only contend on a shard lock. Memory is bounded two
//! ways: every `sweep_every`-th check sweeps inline, and `ThrottleSweeperTask` sweeps
//! on a timer so an idle server does not hold stale entries forever.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of checks between two inline sweeps.
pub const DEFAULT_SWEEP_EVERY: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Rejected,
}

#[derive(Debug)]
pub struct ThrottleGuard {
    window: Option<Duration>,
    entries: DashMap<IpAddr, Instant>,
    checks: AtomicU64,
    sweep_every: u64,
}

impl ThrottleGuard {
    /// Creates a guard with the given window. `None` disables throttling entirely.
    pub fn new(window: Option<Duration>) -> Self {
        Self::with_sweep_interval(window, DEFAULT_SWEEP_EVERY)
    }

    pub fn with_sweep_interval(window: Option<Duration>, sweep_every: u64) -> Self {
        Self {
            window,
            entries: DashMap::new(),
            checks: AtomicU64::new(0),
            sweep_every: sweep_every.max(1),
        }
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// Records a login attempt from `ip` at `now` and decides whether it may proceed.
    ///
    /// The timestamp is updated on every call, including rejected ones, so a client
    /// hammering the server keeps pushing its own window forward. Loopback addresses
    /// are recorded but never rejected.
    pub fn check_and_record(&self, ip: IpAddr, now: Instant) -> ThrottleDecision {
        let Some(window) = self.window else {
            return ThrottleDecision::Allowed;
        };
        // IPv4-mapped IPv6 peers share an entry with their IPv4 form.
        let ip = ip.to_canonical();
        let previous = self.entries.insert(ip, now);

        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % self.sweep_every == 0 {
            let evicted = self.sweep(now);
            if evicted > 0 {
                debug!("Throttle sweep evicted {} stale entries.", evicted);
            }
        }

        if ip.is_loopback() {
            return ThrottleDecision::Allowed;
        }
        match previous {
            Some(last) if now.saturating_duration_since(last) < window => {
                ThrottleDecision::Rejected
            }
            _ => ThrottleDecision::Allowed,
        }
    }

    /// Evicts entries older than the window and returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let Some(window) = self.window else {
            return 0;
        };
        let before = self.entries.len();
        self.entries
            .retain(|_, last| now.saturating_duration_since(*last) <= window);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
