//! # Metrics Collector
//!
//! Per-queue counters for observability. Passive and read-only to callers:
//! every field of a [`MetricsSnapshot`] is derived from the counters, never
//! independently mutated. Counters are owned by one queue instance, so
//! independent queues never interfere.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters recorded by the queue manager during processing
#[derive(Debug, Default)]
pub struct MetricsCollector {
    total_attempts: AtomicU64,
    successful_syncs: AtomicU64,
    failed_syncs: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    success_latency_total_ms: AtomicU64,
}

/// Point-in-time view of the collector
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Dispatch attempts, successful or not
    pub total_attempts: u64,
    /// Attempts that completed successfully
    pub successful_syncs: u64,
    /// Attempts that failed
    pub failed_syncs: u64,
    /// Closed-to-open breaker transitions
    pub circuit_breaker_trips: u64,
    /// Running mean latency over successful attempts, in milliseconds
    pub average_latency_ms: f64,
    /// successful / (successful + failed); 0 when nothing completed yet
    pub success_rate: f64,
    /// (total - failed) / total; 0 when nothing was attempted yet
    pub reliability: f64,
}

impl MetricsCollector {
    /// Create a collector with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one dispatch attempt
    pub fn record_attempt(&self) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one successful attempt and fold its latency into the mean
    pub fn record_success(&self, latency: Duration) {
        self.successful_syncs.fetch_add(1, Ordering::Relaxed);
        self.success_latency_total_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Count one failed attempt
    pub fn record_failure(&self) {
        self.failed_syncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one closed-to-open breaker transition
    pub fn record_trip(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Derive a snapshot from the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_attempts.load(Ordering::Relaxed);
        let successful = self.successful_syncs.load(Ordering::Relaxed);
        let failed = self.failed_syncs.load(Ordering::Relaxed);
        let latency_total = self.success_latency_total_ms.load(Ordering::Relaxed);

        let average_latency_ms = if successful > 0 {
            latency_total as f64 / successful as f64
        } else {
            0.0
        };
        let completed = successful + failed;
        let success_rate = if completed > 0 {
            successful as f64 / completed as f64
        } else {
            0.0
        };
        let reliability = if total > 0 {
            (total - failed) as f64 / total as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_attempts: total,
            successful_syncs: successful,
            failed_syncs: failed,
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
            average_latency_ms,
            success_rate,
            reliability,
        }
    }
}
