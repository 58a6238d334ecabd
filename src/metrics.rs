// Performance metrics module
//
// Provides lightweight metrics tracking for monitoring ingestion activity

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Global performance metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Metrics are collected across ingestion runs and logged on shutdown for
/// performance analysis.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of cards successfully ingested
    pub cards_ingested: AtomicUsize,

    /// Total number of ingestion runs that failed
    pub runs_failed: AtomicUsize,

    /// Total number of media files copied off cards
    pub files_copied: AtomicU64,

    /// Total bytes copied off cards
    pub bytes_copied: AtomicU64,

    /// Total ingestion time in milliseconds
    pub total_ingest_time_ms: AtomicU64,

    /// Number of state snapshots published
    pub state_publishes: AtomicU64,

    /// Number of failed notifier deliveries
    pub notify_failures: AtomicU64,

    /// Application start time
    start_time: Instant,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            cards_ingested: AtomicUsize::new(0),
            runs_failed: AtomicUsize::new(0),
            files_copied: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            total_ingest_time_ms: AtomicU64::new(0),
            state_publishes: AtomicU64::new(0),
            notify_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one successfully ingested card and its run duration
    pub fn record_ingest(&self, duration: Duration) {
        self.cards_ingested.fetch_add(1, Ordering::Relaxed);
        self.total_ingest_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a failed ingestion run
    pub fn record_run_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one copied file and its size
    pub fn record_copy(&self, bytes: u64) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a published state snapshot
    pub fn record_state_publish(&self) {
        self.state_publishes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed notifier delivery
    pub fn record_notify_failure(&self) {
        self.notify_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average ingestion time per card in milliseconds
    pub fn avg_ingest_time_ms(&self) -> f64 {
        let total = self.total_ingest_time_ms.load(Ordering::Relaxed);
        let count = self.cards_ingested.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let uptime = self.uptime();
        tracing::info!("=== Performance Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", uptime.as_secs_f64());
        tracing::info!(
            "Cards: {} ingested, {} failed runs",
            self.cards_ingested.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Files: {} copied ({:.2} MB)",
            self.files_copied.load(Ordering::Relaxed),
            self.bytes_copied.load(Ordering::Relaxed) as f64 / 1_048_576.0
        );
        tracing::info!(
            "Total ingest time: {:.2}s (avg: {:.2}ms per card)",
            self.total_ingest_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_ingest_time_ms()
        );
        tracing::info!(
            "State publishes: {}, notify failures: {}",
            self.state_publishes.load(Ordering::Relaxed),
            self.notify_failures.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
