//! Link Monitor - tracks how long ago the bus last answered a telemetry read
//!
//! Timestamps are microseconds relative to a process-wide monotonic anchor,
//! so they can live in an `AtomicU64` and are unaffected by wall-clock changes.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic microseconds since the first call in this process
pub fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Bus link health monitor
#[derive(Debug)]
pub struct LinkMonitor {
    last_success: AtomicU64,
    timeout: Duration,
}

impl LinkMonitor {
    /// `timeout`: maximum silence before the link is considered lost
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_success: AtomicU64::new(monotonic_micros()),
            timeout,
        }
    }

    /// Record a successful telemetry transaction
    pub fn register_success(&self) {
        self.last_success.store(monotonic_micros(), Ordering::Relaxed);
    }

    /// True if the bus answered within the timeout window
    pub fn is_alive(&self) -> bool {
        self.time_since_last_success() < self.timeout
    }

    pub fn time_since_last_success(&self) -> Duration {
        let last_us = self.last_success.load(Ordering::Relaxed);
        Duration::from_micros(monotonic_micros().saturating_sub(last_us))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
