//! Metrics collection for lapse.
//!
//! Process-wide counters for the reconciliation job, exported as JSON
//! snapshots or in Prometheus text format.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Reconciliation metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Runs that completed (with or without account failures).
    pub runs_completed: AtomicU64,
    /// Runs aborted because eligible accounts could not be selected.
    pub runs_failed: AtomicU64,
    /// Runs that stopped early on shutdown.
    pub runs_interrupted: AtomicU64,
    /// Runs refused because another run held the lock.
    pub runs_rejected: AtomicU64,
    /// Accounts moved to the locked state.
    pub accounts_locked: AtomicU64,
    /// Accounts whose transition failed.
    pub accounts_failed: AtomicU64,
    /// Accounts left for a later run because of shutdown.
    pub accounts_skipped: AtomicU64,
    /// Creator memberships found after pending actions ran.
    pub creator_anomalies: AtomicU64,
    /// Memberships removed by the job.
    pub memberships_removed: AtomicU64,
    /// Total run time in milliseconds.
    pub run_time_ms_total: AtomicU64,
    /// Duration of the most recent completed run in milliseconds.
    pub last_run_duration_ms: AtomicU64,
    /// Unix timestamp of the most recent completed run.
    pub last_run_finished_at: AtomicU64,
}

/// Per-run counters fed into [`Metrics::record_run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounters {
    pub locked: u64,
    pub failed: u64,
    pub skipped: u64,
    pub anomalies: u64,
    pub memberships_removed: u64,
    pub interrupted: bool,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_interrupted: AtomicU64::new(0),
            runs_rejected: AtomicU64::new(0),
            accounts_locked: AtomicU64::new(0),
            accounts_failed: AtomicU64::new(0),
            accounts_skipped: AtomicU64::new(0),
            creator_anomalies: AtomicU64::new(0),
            memberships_removed: AtomicU64::new(0),
            run_time_ms_total: AtomicU64::new(0),
            last_run_duration_ms: AtomicU64::new(0),
            last_run_finished_at: AtomicU64::new(0),
        }
    }

    /// Record a finished run.
    pub fn record_run(&self, counters: RunCounters, duration: Duration, finished_at_unix: i64) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        if counters.interrupted {
            self.runs_interrupted.fetch_add(1, Ordering::Relaxed);
        }
        self.accounts_locked
            .fetch_add(counters.locked, Ordering::Relaxed);
        self.accounts_failed
            .fetch_add(counters.failed, Ordering::Relaxed);
        self.accounts_skipped
            .fetch_add(counters.skipped, Ordering::Relaxed);
        self.creator_anomalies
            .fetch_add(counters.anomalies, Ordering::Relaxed);
        self.memberships_removed
            .fetch_add(counters.memberships_removed, Ordering::Relaxed);

        let ms = duration.as_millis() as u64;
        self.run_time_ms_total.fetch_add(ms, Ordering::Relaxed);
        self.last_run_duration_ms.store(ms, Ordering::Relaxed);
        self.last_run_finished_at
            .store(finished_at_unix.max(0) as u64, Ordering::Relaxed);
    }

    /// Record a run that could not select accounts.
    pub fn record_run_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a trigger refused by the run lock.
    pub fn record_run_rejected(&self) {
        self.runs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let runs_completed = self.runs_completed.load(Ordering::Relaxed);
        let run_time_ms_total = self.run_time_ms_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            runs_completed,
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_interrupted: self.runs_interrupted.load(Ordering::Relaxed),
            runs_rejected: self.runs_rejected.load(Ordering::Relaxed),
            accounts_locked: self.accounts_locked.load(Ordering::Relaxed),
            accounts_failed: self.accounts_failed.load(Ordering::Relaxed),
            accounts_skipped: self.accounts_skipped.load(Ordering::Relaxed),
            creator_anomalies: self.creator_anomalies.load(Ordering::Relaxed),
            memberships_removed: self.memberships_removed.load(Ordering::Relaxed),
            run_avg_time_ms: if runs_completed > 0 {
                run_time_ms_total / runs_completed
            } else {
                0
            },
            last_run_duration_ms: self.last_run_duration_ms.load(Ordering::Relaxed),
            last_run_finished_at: self.last_run_finished_at.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let counters: [(&str, &str, u64); 9] = [
            ("runs_completed", "Reconciliation runs completed", snapshot.runs_completed),
            ("runs_failed", "Reconciliation runs aborted before processing", snapshot.runs_failed),
            ("runs_interrupted", "Reconciliation runs stopped by shutdown", snapshot.runs_interrupted),
            ("runs_rejected", "Reconciliation triggers refused by the run lock", snapshot.runs_rejected),
            ("accounts_locked", "Accounts permanently locked", snapshot.accounts_locked),
            ("accounts_failed", "Account transitions that failed", snapshot.accounts_failed),
            ("accounts_skipped", "Accounts deferred by shutdown", snapshot.accounts_skipped),
            ("creator_anomalies", "Creator memberships left after pending actions", snapshot.creator_anomalies),
            ("memberships_removed", "Group memberships removed", snapshot.memberships_removed),
        ];

        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP lapse_{name} {help}");
            let _ = writeln!(output, "# TYPE lapse_{name} counter");
            let _ = writeln!(output, "lapse_{name} {value}");
        }

        let gauges: [(&str, &str, u64); 3] = [
            ("run_avg_time_ms", "Average run duration", snapshot.run_avg_time_ms),
            ("last_run_duration_ms", "Duration of the last run", snapshot.last_run_duration_ms),
            ("last_run_finished_at", "Unix time the last run finished", snapshot.last_run_finished_at),
        ];

        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP lapse_{name} {help}");
            let _ = writeln!(output, "# TYPE lapse_{name} gauge");
            let _ = writeln!(output, "lapse_{name} {value}");
        }

        output
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_interrupted: u64,
    pub runs_rejected: u64,
    pub accounts_locked: u64,
    pub accounts_failed: u64,
    pub accounts_skipped: u64,
    pub creator_anomalies: u64,
    pub memberships_removed: u64,
    pub run_avg_time_ms: u64,
    pub last_run_duration_ms: u64,
    pub last_run_finished_at: u64,
}
