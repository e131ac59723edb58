//! Control-loop counters.
//!
//! Every field is an atomic so the engine, the coordinator and the
//! `/metrics` handler can share one `Arc<Telemetry>` without locking.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Telemetry {
    determination_cycles: AtomicU64,
    rules_submitted: AtomicU64,
    rules_adopted: AtomicU64,
    rules_refused: AtomicU64,
    submission_failures: AtomicU64,
    revocations: AtomicU64,
    threshold: AtomicI64,
    threshold_set: AtomicBool,

    coordinator_cycles: AtomicU64,
    rules_accepted: AtomicU64,
    rules_bootstrapped: AtomicU64,
    bootstrap_batches: AtomicU64,
    batch_failures: AtomicU64,
    cas_conflicts: AtomicU64,
    coordinator_failures: AtomicU64,
}

/// Plain-value copy of [`Telemetry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub determination_cycles: u64,
    pub rules_submitted: u64,
    pub rules_adopted: u64,
    pub rules_refused: u64,
    pub submission_failures: u64,
    pub revocations: u64,
    /// Promotion threshold of the last cycle that had shapes to rank.
    pub threshold: Option<i64>,

    pub coordinator_cycles: u64,
    pub rules_accepted: u64,
    pub rules_bootstrapped: u64,
    pub bootstrap_batches: u64,
    pub batch_failures: u64,
    pub cas_conflicts: u64,
    pub coordinator_failures: u64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Determination engine ───────────────────────────────────────

    pub fn record_determination_cycle(&self, threshold: Option<i64>) {
        self.determination_cycles.fetch_add(1, Ordering::Relaxed);
        if let Some(t) = threshold {
            self.threshold.store(t, Ordering::Relaxed);
            self.threshold_set.store(true, Ordering::Relaxed);
        }
    }

    pub fn record_submitted(&self, n: u64) {
        self.rules_submitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_adopted(&self, n: u64) {
        self.rules_adopted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_refused(&self, n: u64) {
        self.rules_refused.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_submission_failures(&self, n: u64) {
        self.submission_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_revocations(&self, n: u64) {
        self.revocations.fetch_add(n, Ordering::Relaxed);
    }

    // ── Lifecycle coordinator ──────────────────────────────────────

    pub fn record_coordinator_cycle(&self) {
        self.coordinator_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self, n: u64) {
        self.rules_accepted.fetch_add(n, Ordering::Relaxed);
    }

    /// A batch was written and `rules` of its members moved to bootstrapping.
    pub fn record_bootstrap_batch(&self, rules: u64) {
        self.bootstrap_batches.fetch_add(1, Ordering::Relaxed);
        self.rules_bootstrapped.fetch_add(rules, Ordering::Relaxed);
    }

    pub fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cas_conflicts(&self, n: u64) {
        self.cas_conflicts.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_coordinator_failure(&self) {
        self.coordinator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TelemetrySnapshot {
            determination_cycles: load(&self.determination_cycles),
            rules_submitted: load(&self.rules_submitted),
            rules_adopted: load(&self.rules_adopted),
            rules_refused: load(&self.rules_refused),
            submission_failures: load(&self.submission_failures),
            revocations: load(&self.revocations),
            threshold: self
                .threshold_set
                .load(Ordering::Relaxed)
                .then(|| self.threshold.load(Ordering::Relaxed)),
            coordinator_cycles: load(&self.coordinator_cycles),
            rules_accepted: load(&self.rules_accepted),
            rules_bootstrapped: load(&self.rules_bootstrapped),
            bootstrap_batches: load(&self.bootstrap_batches),
            batch_failures: load(&self.batch_failures),
            cas_conflicts: load(&self.cas_conflicts),
            coordinator_failures: load(&self.coordinator_failures),
        }
    }
}
