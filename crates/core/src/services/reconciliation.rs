//! Account lifecycle reconciliation.
//!
//! Finds accounts whose deletion grace period has elapsed and moves each one
//! from the deactivated state to the locked (soft-deleted) state:
//!
//! 1. run the recorded pending group actions,
//! 2. drop the account's non-creator memberships,
//! 3. mark the account deleted.
//!
//! Steps 2 and 3 commit together in one unit of work. A failure on one
//! account is recorded and the run moves on to the next.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use lapse_common::{AppResult, IdGenerator, get_metrics};
use lapse_db::entities::account;
use lapse_db::entities::group_member::GroupRole;
use lapse_db::{AccountGateway, AccountQuery, RoleFilter};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::executor::ActionExecutorService;
use super::run_summary::{AccountFailure, AccountOutcome, LockReport, RunSummary, TransitionStage};

/// Accounts selected by one eligibility read.
///
/// Owns its rows. Iterating consumes it, and it never goes back to the store.
#[derive(Debug)]
pub struct EligibleAccounts {
    inner: std::vec::IntoIter<account::Model>,
}

impl EligibleAccounts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

impl Iterator for EligibleAccounts {
    type Item = account::Model;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for EligibleAccounts {}

/// Read the accounts due for locking at `now`.
///
/// An account is due when it is deactivated, not deleted, was deactivated at
/// or before `now - grace_period`, and carries a non-blank pending actions
/// payload. Accounts on a break (no payload) are never selected.
pub async fn select_eligible_accounts(
    gateway: &dyn AccountGateway,
    now: DateTime<Utc>,
    grace_period: Duration,
) -> AppResult<EligibleAccounts> {
    let cutoff = now - grace_period;
    let accounts = gateway
        .query_accounts(&AccountQuery::eligible_for_lock(cutoff))
        .await?;

    Ok(EligibleAccounts {
        inner: accounts.into_iter(),
    })
}

/// Drive one account through the lock transition.
pub async fn lock_account(
    gateway: &dyn AccountGateway,
    executor: &ActionExecutorService,
    account: account::Model,
    now: DateTime<Utc>,
) -> AccountOutcome {
    let result = transition(gateway, executor, &account, now).await;

    AccountOutcome {
        account_id: account.id,
        username: account.username,
        result,
    }
}

async fn transition(
    gateway: &dyn AccountGateway,
    executor: &ActionExecutorService,
    account: &account::Model,
    now: DateTime<Utc>,
) -> Result<LockReport, AccountFailure> {
    use TransitionStage::{Committing, ExecutingActions, Locking, PruningMemberships};

    let payload = account.pending_group_actions.as_deref().unwrap_or_default();
    let actions = executor
        .execute_pending_actions(&account.id, payload)
        .await
        .map_err(|e| AccountFailure::at(ExecutingActions, e))?;

    let mut uow = gateway
        .begin()
        .await
        .map_err(|e| AccountFailure::at(PruningMemberships, e))?;

    let creators = uow
        .memberships(&account.id, RoleFilter::Only(GroupRole::Creator))
        .await
        .map_err(|e| AccountFailure::at(PruningMemberships, e))?;

    if !creators.is_empty() {
        let group_ids: Vec<&str> = creators.iter().map(|m| m.group_id.as_str()).collect();
        warn!(
            account_id = %account.id,
            username = %account.username,
            groups = ?group_ids,
            "Account still creates groups after pending actions ran"
        );
    }

    let members = uow
        .memberships(&account.id, RoleFilter::Except(GroupRole::Creator))
        .await
        .map_err(|e| AccountFailure::at(PruningMemberships, e))?;

    let memberships_removed = uow
        .remove_memberships(&members)
        .await
        .map_err(|e| AccountFailure::at(PruningMemberships, e))?;

    let mut locked = account.clone();
    locked.is_deleted = true;
    locked.deleted_at = Some(now.into());
    locked.updated_at = Some(now.into());

    uow.update_account(&locked)
        .await
        .map_err(|e| AccountFailure::at(Locking, e))?;

    uow.commit()
        .await
        .map_err(|e| AccountFailure::at(Committing, e))?;

    Ok(LockReport {
        memberships_removed,
        creator_anomalies: creators.len() as u64,
        actions,
    })
}

/// Something that can perform a reconciliation run.
#[async_trait]
pub trait ReconciliationRunner: Send + Sync {
    async fn run_reconciliation(&self) -> AppResult<RunSummary>;
}

/// Job settings taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub grace_period: Duration,
    /// Accounts in flight at once. 1 runs them one after another.
    pub concurrency: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::days(30),
            concurrency: 1,
        }
    }
}

impl From<&lapse_common::config::ReconciliationConfig> for JobSettings {
    fn from(config: &lapse_common::config::ReconciliationConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            concurrency: config.concurrency.max(1),
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The reconciliation job.
#[derive(Clone)]
pub struct ReconciliationJob {
    gateway: Arc<dyn AccountGateway>,
    executor: ActionExecutorService,
    settings: JobSettings,
    shutdown: watch::Receiver<bool>,
    clock: Clock,
    id_gen: IdGenerator,
}

impl ReconciliationJob {
    /// Create a job. Setting the `shutdown` value to `true` stops new
    /// accounts from being started.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn AccountGateway>,
        executor: ActionExecutorService,
        settings: JobSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            executor,
            settings,
            shutdown,
            clock: Arc::new(Utc::now),
            id_gen: IdGenerator::new(),
        }
    }

    /// Replace the clock used for eligibility and lock timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Run once over the accounts eligible right now.
    pub async fn run(&self) -> AppResult<RunSummary> {
        let run_id = self.id_gen.generate();
        let started_at = (self.clock)();
        let timer = Instant::now();

        debug!(
            run_id = %run_id,
            started_at = %started_at,
            grace_period_days = self.settings.grace_period.num_days(),
            "Reconciliation run starting"
        );

        let eligible = match select_eligible_accounts(
            self.gateway.as_ref(),
            started_at,
            self.settings.grace_period,
        )
        .await
        {
            Ok(eligible) => eligible,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to select eligible accounts");
                get_metrics().record_run_failure();
                return Err(e);
            }
        };

        let total = eligible.len() as u64;
        if total == 0 {
            debug!(run_id = %run_id, "No accounts eligible for locking");
        } else {
            info!(run_id = %run_id, eligible = total, "Locking eligible accounts");
        }

        let shutdown = self.shutdown.clone();
        let outcomes: Vec<AccountOutcome> = stream::iter(eligible)
            .take_while(move |_| {
                let stopping = *shutdown.borrow();
                async move { !stopping }
            })
            .map(|account| self.process(account, started_at))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let finished_at = (self.clock)();
        let summary =
            RunSummary::from_outcomes(run_id, started_at, finished_at, total, &outcomes);

        get_metrics().record_run(
            summary.counters(),
            timer.elapsed(),
            finished_at.timestamp(),
        );

        if summary.interrupted {
            warn!(
                run_id = %summary.run_id,
                skipped = summary.skipped,
                "Reconciliation run interrupted by shutdown"
            );
        }

        if total == 0 {
            debug!(run_id = %summary.run_id, "Reconciliation run finished");
        } else {
            info!(
                run_id = %summary.run_id,
                started_at = %summary.started_at,
                finished_at = %summary.finished_at,
                eligible = summary.eligible,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                anomalies = summary.anomalies,
                duration_ms = timer.elapsed().as_millis() as u64,
                "Reconciliation run finished"
            );
        }

        Ok(summary)
    }

    async fn process(&self, account: account::Model, now: DateTime<Utc>) -> AccountOutcome {
        let outcome = lock_account(self.gateway.as_ref(), &self.executor, account, now).await;

        match &outcome.result {
            Ok(report) => {
                info!(
                    account_id = %outcome.account_id,
                    username = %outcome.username,
                    memberships_removed = report.memberships_removed,
                    actions_executed = report.actions.executed(),
                    "Account locked"
                );
            }
            Err(failure) => {
                error!(
                    account_id = %outcome.account_id,
                    username = %outcome.username,
                    stage = ?failure.stage,
                    error = %failure.error,
                    "Failed to lock account"
                );
            }
        }

        outcome
    }
}

#[async_trait]
impl ReconciliationRunner for ReconciliationJob {
    async fn run_reconciliation(&self) -> AppResult<RunSummary> {
        self.run().await
    }
}
