//! Process-wide counters and the health snapshot built from them.
//!
//! Every pipeline component receives an `Arc<Counters>` at construction
//! time; nothing here is a global. All updates are single atomic operations
//! with relaxed ordering: the numbers are for operators, not for
//! synchronisation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::{ShutdownPhase, ShutdownState};

/// Shared counters and gauges.
#[derive(Debug)]
pub struct Counters {
    started_at: DateTime<Utc>,
    started: Instant,

    total_received: AtomicU64,
    total_enqueued: AtomicU64,
    total_dropped: AtomicU64,
    total_rejected: AtomicU64,
    total_processed: AtomicU64,
    total_errors: AtomicU64,
    total_duplicates: AtomicU64,
    invalid_signatures: AtomicU64,
    malformed_payloads: AtomicU64,
    total_coalesced: AtomicU64,

    queue_depth: AtomicUsize,
    dedup_entries: AtomicUsize,
    debounce_pending: AtomicUsize,
    dispatch_in_flight: AtomicUsize,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($incr:ident, $get:ident, $field:ident) => {
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

macro_rules! gauge {
    ($set:ident, $get:ident, $field:ident) => {
        pub fn $set(&self, value: usize) {
            self.$field.store(value, Ordering::Relaxed);
        }

        pub fn $get(&self) -> usize {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Counters {
    pub fn new() -> Self {
        Counters {
            started_at: Utc::now(),
            started: Instant::now(),
            total_received: AtomicU64::new(0),
            total_enqueued: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_duplicates: AtomicU64::new(0),
            invalid_signatures: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            total_coalesced: AtomicU64::new(0),
            queue_depth: AtomicUsize::new(0),
            dedup_entries: AtomicUsize::new(0),
            debounce_pending: AtomicUsize::new(0),
            dispatch_in_flight: AtomicUsize::new(0),
        }
    }

    // Deliveries seen by the HTTP layer (accepted or not).
    counter!(record_received, total_received, total_received);
    counter!(record_enqueued, total_enqueued, total_enqueued);
    // Queue full: acknowledged but never processed.
    counter!(record_dropped, total_dropped, total_dropped);
    // Refused with 503 while draining.
    counter!(record_rejected, total_rejected, total_rejected);
    counter!(record_processed, total_processed, total_processed);
    counter!(record_error, total_errors, total_errors);
    counter!(record_duplicate, total_duplicates, total_duplicates);
    // Messages replaced by a newer one from the same sender.
    counter!(record_coalesced, total_coalesced, total_coalesced);

    gauge!(set_queue_depth, queue_depth, queue_depth);
    gauge!(set_dedup_entries, dedup_entries, dedup_entries);
    gauge!(set_debounce_pending, debounce_pending, debounce_pending);
    gauge!(set_dispatch_in_flight, dispatch_in_flight, dispatch_in_flight);

    /// Counts a signature failure. Also counts towards `total_errors`.
    pub fn record_invalid_signature(&self) {
        self.invalid_signatures.fetch_add(1, Ordering::Relaxed);
        self.record_error();
    }

    pub fn invalid_signatures(&self) -> u64 {
        self.invalid_signatures.load(Ordering::Relaxed)
    }

    /// Counts an unparseable delivery. Also counts towards `total_errors`.
    pub fn record_malformed(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
        self.record_error();
    }

    pub fn malformed_payloads(&self) -> u64 {
        self.malformed_payloads.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Point-in-time copy of the pipeline's counters, as served on `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub status: ShutdownPhase,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,

    pub total_received: u64,
    pub total_enqueued: u64,
    pub total_dropped: u64,
    pub total_rejected: u64,
    pub total_processed: u64,
    pub total_errors: u64,
    pub total_duplicates: u64,
    pub total_coalesced: u64,
    pub invalid_signatures: u64,
    pub malformed_payloads: u64,

    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub dispatch_in_flight: usize,
    pub max_concurrency: usize,
    pub dedup_entries: usize,
    pub debounce_pending: usize,
}

/// Builds [`HealthSnapshot`]s. Read-only; cloning is cheap.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    counters: Arc<Counters>,
    shutdown: Arc<ShutdownState>,
    queue_capacity: usize,
    max_concurrency: usize,
}

impl HealthReporter {
    pub fn new(
        counters: Arc<Counters>,
        shutdown: Arc<ShutdownState>,
        queue_capacity: usize,
        max_concurrency: usize,
    ) -> Self {
        HealthReporter {
            counters,
            shutdown,
            queue_capacity,
            max_concurrency,
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let c = &self.counters;
        HealthSnapshot {
            status: self.shutdown.phase(),
            started_at: c.started_at(),
            uptime_secs: c.uptime_secs(),
            total_received: c.total_received(),
            total_enqueued: c.total_enqueued(),
            total_dropped: c.total_dropped(),
            total_rejected: c.total_rejected(),
            total_processed: c.total_processed(),
            total_errors: c.total_errors(),
            total_duplicates: c.total_duplicates(),
            total_coalesced: c.total_coalesced(),
            invalid_signatures: c.invalid_signatures(),
            malformed_payloads: c.malformed_payloads(),
            queue_depth: c.queue_depth(),
            queue_capacity: self.queue_capacity,
            dispatch_in_flight: c.dispatch_in_flight(),
            max_concurrency: self.max_concurrency,
            dedup_entries: c.dedup_entries(),
            debounce_pending: c.debounce_pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_counters_are_zero() {
        let c = Counters::new();
        assert_eq!(c.total_received(), 0);
        assert_eq!(c.total_errors(), 0);
        assert_eq!(c.queue_depth(), 0);
    }

    #[test]
    fn validation_failures_count_as_errors() {
        let c = Counters::new();
        c.record_invalid_signature();
        c.record_malformed();
        c.record_malformed();

        assert_eq!(c.invalid_signatures(), 1);
        assert_eq!(c.malformed_payloads(), 2);
        assert_eq!(c.total_errors(), 3);
    }

    #[test]
    fn duplicates_are_not_errors() {
        let c = Counters::new();
        c.record_duplicate();
        assert_eq!(c.total_duplicates(), 1);
        assert_eq!(c.total_errors(), 0);
    }

    #[test]
    fn snapshot_reflects_counters_and_gauges() {
        let counters = Arc::new(Counters::new());
        let shutdown = Arc::new(ShutdownState::new());
        let reporter = HealthReporter::new(Arc::clone(&counters), Arc::clone(&shutdown), 500, 10);

        counters.record_received();
        counters.record_processed();
        counters.record_error();
        counters.set_queue_depth(7);
        counters.set_dedup_entries(3);

        let snap = reporter.snapshot();
        assert_eq!(snap.status, ShutdownPhase::Running);
        assert_eq!(snap.total_received, 1);
        assert_eq!(snap.total_processed, 1);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.queue_depth, 7);
        assert_eq!(snap.queue_capacity, 500);
        assert_eq!(snap.max_concurrency, 10);
        assert_eq!(snap.dedup_entries, 3);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let counters = Arc::new(Counters::new());
        let reporter =
            HealthReporter::new(Arc::clone(&counters), Arc::new(ShutdownState::new()), 1, 1);

        let before = reporter.snapshot();
        counters.record_received();

        assert_eq!(before.total_received, 0);
        assert_eq!(reporter.snapshot().total_received, 1);
    }

    #[test]
    fn snapshot_serializes_status_as_snake_case() {
        let shutdown = Arc::new(ShutdownState::new());
        let reporter = HealthReporter::new(Arc::new(Counters::new()), Arc::clone(&shutdown), 1, 1);
        shutdown.begin_draining();

        let json = serde_json::to_value(reporter.snapshot()).unwrap();
        assert_eq!(json["status"], "draining");
        assert_eq!(json["total_processed"], 0);
    }
}
