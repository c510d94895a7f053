//! Business logic services.

#![allow(missing_docs)]

pub mod executor;
pub mod lifecycle;
pub mod pending_actions;
pub mod reconciliation;
pub mod run_summary;

pub use executor::{ActionExecutorService, ActionsReport, GroupActionExecutor, PendingActionExecutor};
pub use lifecycle::AccountLifecycleService;
pub use pending_actions::{PAYLOAD_VERSION, PendingGroupAction, PendingGroupActions};
pub use reconciliation::{
    EligibleAccounts, JobSettings, ReconciliationJob, ReconciliationRunner, lock_account,
    select_eligible_accounts,
};
pub use run_summary::{
    AccountError, AccountFailure, AccountOutcome, LockReport, RunHistory, RunSummary,
    TransitionStage,
};
