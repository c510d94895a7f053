//! Single entry point for starting a reconciliation run.

use std::sync::Arc;

use lapse_common::{AppError, AppResult, get_metrics};
use lapse_core::{ReconciliationRunner, RunHistory, RunSummary};
use serde::Serialize;

use crate::lock::RunLock;
use crate::scheduler::JobExecutor;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => f.write_str("scheduled"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Runs reconciliation under the run lock and keeps the run history.
///
/// Scheduled ticks and manual admin requests both go through here, so two
/// runs never overlap.
#[derive(Clone)]
pub struct ReconciliationTrigger {
    runner: Arc<dyn ReconciliationRunner>,
    lock: Arc<dyn RunLock>,
    history: RunHistory,
}

impl ReconciliationTrigger {
    #[must_use]
    pub fn new(
        runner: Arc<dyn ReconciliationRunner>,
        lock: Arc<dyn RunLock>,
        history: RunHistory,
    ) -> Self {
        Self {
            runner,
            lock,
            history,
        }
    }

    /// Summaries of recent runs, newest first.
    #[must_use]
    pub const fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Start a run now. Fails with `Conflict` if one is already in progress.
    pub async fn trigger(&self, source: TriggerSource) -> AppResult<RunSummary> {
        let Some(guard) = self.lock.try_acquire().await? else {
            get_metrics().record_run_rejected();
            tracing::info!(source = %source, "Reconciliation already running, trigger rejected");
            return Err(AppError::Conflict(
                "reconciliation already running".to_string(),
            ));
        };

        tracing::debug!(source = %source, "Reconciliation triggered");
        let result = self.runner.run_reconciliation().await;

        if let Err(e) = guard.release().await {
            tracing::warn!(error = %e, "Failed to release reconciliation lock");
        }

        let summary = result?;
        self.history.record(summary.clone()).await;
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl JobExecutor for ReconciliationTrigger {
    async fn reconcile_accounts(&self) -> AppResult<RunSummary> {
        self.trigger(TriggerSource::Scheduled).await
    }
}
