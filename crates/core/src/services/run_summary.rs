//! Results of reconciliation runs.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lapse_common::{AppError, RunCounters};
use serde::Serialize;
use tokio::sync::RwLock;

use super::executor::ActionsReport;

/// Step of the lock transition an account was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionStage {
    /// Running the recorded group actions.
    ExecutingActions,
    /// Reading and removing group memberships.
    PruningMemberships,
    /// Marking the account deleted.
    Locking,
    /// Committing the unit of work.
    Committing,
}

/// Successful lock of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReport {
    pub memberships_removed: u64,
    /// Creator memberships found after the actions ran. Left in place.
    pub creator_anomalies: u64,
    pub actions: ActionsReport,
}

/// Failed lock of one account.
#[derive(Debug, Clone)]
pub struct AccountFailure {
    pub stage: TransitionStage,
    pub error: AppError,
}

impl AccountFailure {
    #[must_use]
    pub const fn at(stage: TransitionStage, error: AppError) -> Self {
        Self { stage, error }
    }
}

/// Outcome of driving one account through the lock transition.
#[derive(Debug, Clone)]
pub struct AccountOutcome {
    pub account_id: String,
    pub username: String,
    pub result: Result<LockReport, AccountFailure>,
}

/// Failure entry carried in a [`RunSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountError {
    pub account_id: String,
    pub username: String,
    pub stage: TransitionStage,
    pub code: String,
    pub message: String,
}

/// Aggregate result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Accounts selected at the start of the run.
    pub eligible: u64,
    /// Accounts whose transition was started.
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Accounts never started because of shutdown.
    pub skipped: u64,
    pub anomalies: u64,
    pub memberships_removed: u64,
    pub interrupted: bool,
    pub errors: Vec<AccountError>,
}

impl RunSummary {
    /// Fold account outcomes into a summary.
    #[must_use]
    pub fn from_outcomes(
        run_id: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        eligible: u64,
        outcomes: &[AccountOutcome],
    ) -> Self {
        let mut summary = Self {
            run_id,
            started_at,
            finished_at,
            eligible,
            processed: outcomes.len() as u64,
            succeeded: 0,
            failed: 0,
            skipped: eligible.saturating_sub(outcomes.len() as u64),
            anomalies: 0,
            memberships_removed: 0,
            interrupted: false,
            errors: Vec::new(),
        };
        summary.interrupted = summary.skipped > 0;

        for outcome in outcomes {
            match &outcome.result {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.anomalies += report.creator_anomalies;
                    summary.memberships_removed += report.memberships_removed;
                }
                Err(failure) => {
                    summary.failed += 1;
                    summary.errors.push(AccountError {
                        account_id: outcome.account_id.clone(),
                        username: outcome.username.clone(),
                        stage: failure.stage,
                        code: failure.error.error_code().to_string(),
                        message: failure.error.to_string(),
                    });
                }
            }
        }

        summary
    }

    /// Counters fed into the process metrics.
    #[must_use]
    pub const fn counters(&self) -> RunCounters {
        RunCounters {
            locked: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            anomalies: self.anomalies,
            memberships_removed: self.memberships_removed,
            interrupted: self.interrupted,
        }
    }
}

/// Recent run summaries, newest first.
#[derive(Clone)]
pub struct RunHistory {
    capacity: usize,
    runs: Arc<RwLock<VecDeque<RunSummary>>>,
}

impl RunHistory {
    /// Keep at most `capacity` summaries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            runs: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub async fn record(&self, summary: RunSummary) {
        let mut runs = self.runs.write().await;
        runs.push_front(summary);
        runs.truncate(self.capacity);
    }

    pub async fn recent(&self) -> Vec<RunSummary> {
        self.runs.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<RunSummary> {
        self.runs.read().await.front().cloned()
    }
}
