//! Counters for the live source broker

use std::sync::atomic::{AtomicU64, Ordering};

/// Running broker counters
///
/// Updated by the registry as handles are opened, reused and closed.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    opens: AtomicU64,
    reuses: AtomicU64,
    open_failures: AtomicU64,
    closes: AtomicU64,
    close_failures: AtomicU64,
}

impl BrokerMetrics {
    /// Create new counters, all zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reuse(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters
    pub fn snapshot(&self) -> BrokerStats {
        BrokerStats {
            opens: self.opens.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }
}

/// Broker-wide statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Physical streams opened
    pub opens: u64,
    /// Consumers attached to an already open stream
    pub reuses: u64,
    /// Opens that failed, timed out or were cancelled
    pub open_failures: u64,
    /// Physical streams closed, including failed closes
    pub closes: u64,
    /// Closes whose connection shutdown failed
    pub close_failures: u64,
}

impl BrokerStats {
    /// Physical streams currently open according to the counters
    pub fn open_streams(&self) -> u64 {
        self.opens.saturating_sub(self.closes)
    }

    /// Total consumers ever attached
    pub fn consumers_attached(&self) -> u64 {
        self.opens + self.reuses
    }
}
