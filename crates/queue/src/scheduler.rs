//! Periodic reconciliation.

use std::sync::Arc;
use std::time::Duration;

use lapse_common::config::ReconciliationConfig;
use lapse_common::{AppError, AppResult};
use lapse_core::RunSummary;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the periodic task runs at all.
    pub enabled: bool,
    /// Time between runs (default: 1 day).
    pub reconciliation_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconciliation_interval: Duration::from_secs(86_400),
        }
    }
}

impl From<&ReconciliationConfig> for SchedulerConfig {
    fn from(config: &ReconciliationConfig) -> Self {
        Self {
            enabled: config.enabled,
            reconciliation_interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Lock every account whose deletion grace period has passed.
    async fn reconcile_accounts(&self) -> AppResult<RunSummary>;
}

/// Spawn the reconciliation loop.
///
/// The first run starts immediately. The loop ends once `shutdown` flips to
/// `true`; a run in progress is left to finish on its own terms.
pub fn run_scheduler<E: JobExecutor + ?Sized + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        tracing::info!("Scheduled reconciliation disabled");
        return None;
    }

    let period = config.reconciliation_interval;
    tracing::info!(interval_secs = period.as_secs(), "Scheduled reconciliation started");

    Some(tokio::spawn(async move {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match executor.reconcile_accounts().await {
                Ok(summary) => {
                    if summary.eligible > 0 {
                        tracing::info!(
                            run_id = %summary.run_id,
                            locked = summary.succeeded,
                            failed = summary.failed,
                            "Scheduled reconciliation finished"
                        );
                    }
                }
                Err(AppError::Conflict(_)) => {
                    tracing::info!("Previous reconciliation still running, tick skipped");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduled reconciliation failed");
                }
            }
        }

        tracing::info!("Scheduled reconciliation stopped");
    }))
}
