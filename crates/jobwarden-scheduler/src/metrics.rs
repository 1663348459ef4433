//! Dispatcher metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Dispatcher counters, updated lock-free from the tick loop and workers.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Completed scans.
    pub ticks: AtomicU64,

    /// Runs handed to the worker pool.
    pub runs_started: AtomicU64,

    /// Runs whose body completed, successfully or not.
    pub runs_finished: AtomicU64,

    /// Runs whose body failed, panicked or was missing.
    pub failures: AtomicU64,

    /// Firings dropped because they were older than the grace period.
    pub misfires: AtomicU64,

    /// Runs that stood in for more than one missed firing.
    pub coalesced: AtomicU64,

    /// Tick-level store errors.
    pub store_errors: AtomicU64,

    /// Runs currently executing.
    pub in_flight: AtomicU64,

    start_time: parking_lot::RwLock<Option<Instant>>,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the tick loop.
    pub fn mark_start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_finished(&self, failed: bool) {
        self.runs_finished.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        // Saturating: never wrap below zero.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_misfire(&self) {
        self.misfires.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_secs: self.uptime_secs(),
            ticks: self.ticks.load(Ordering::Relaxed),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_finished: self.runs_finished.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            misfires: self.misfires.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub ticks: u64,
    pub runs_started: u64,
    pub runs_finished: u64,
    pub failures: u64,
    pub misfires: u64,
    pub coalesced: u64,
    pub store_errors: u64,
    pub in_flight: u64,
}

impl MetricsSnapshot {
    /// Fraction of finished runs that failed.
    pub fn failure_rate(&self) -> f64 {
        if self.runs_finished == 0 {
            return 0.0;
        }
        self.failures as f64 / self.runs_finished as f64
    }
}
