//! Account lifecycle entry points.
//!
//! These write the fields the reconciliation job reads: a break sets the
//! deactivation fields only, a deletion request also records what happens to
//! every group the account creates.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use lapse_common::{AppError, AppResult};
use lapse_db::entities::account;
use lapse_db::repositories::{AccountRepository, GroupRepository};
use sea_orm::Set;

use super::pending_actions::{PendingGroupAction, PendingGroupActions};

/// Service for pausing, scheduling deletion of, and reactivating accounts.
#[derive(Clone)]
pub struct AccountLifecycleService {
    account_repo: AccountRepository,
    group_repo: GroupRepository,
}

impl AccountLifecycleService {
    /// Create a new lifecycle service.
    #[must_use]
    pub const fn new(account_repo: AccountRepository, group_repo: GroupRepository) -> Self {
        Self {
            account_repo,
            group_repo,
        }
    }

    /// Pause an account without scheduling deletion.
    pub async fn deactivate_for_break(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<account::Model> {
        let account = self.account_repo.get_live_by_id(account_id).await?;

        if account.has_pending_group_actions() {
            return Err(AppError::Conflict(
                "Account deletion is already scheduled; reactivate to cancel it".to_string(),
            ));
        }

        if account.is_deactivated {
            return Ok(account);
        }

        let mut active: account::ActiveModel = account.into();
        active.is_deactivated = Set(true);
        active.deactivated_at = Set(Some(now.into()));
        active.pending_group_actions = Set(None);
        active.updated_at = Set(Some(now.into()));
        let updated = self.account_repo.update(active).await?;

        tracing::info!(account_id = %account_id, "Account deactivated for a break");

        Ok(updated)
    }

    /// Deactivate an account and record its deletion request.
    ///
    /// Every group the account creates needs exactly one action, and actions
    /// may only target those groups. The grace period starts at `now`.
    pub async fn schedule_deletion(
        &self,
        account_id: &str,
        actions: Vec<PendingGroupAction>,
        now: DateTime<Utc>,
    ) -> AppResult<account::Model> {
        let account = self.account_repo.get_live_by_id(account_id).await?;
        let payload = PendingGroupActions::new(actions);
        payload.ensure_unique_groups()?;

        let created: HashSet<String> = self
            .group_repo
            .find_created_by(account_id)
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();

        for action in &payload.actions {
            let group_id = action.group_id();
            if !created.contains(group_id) {
                return Err(AppError::Forbidden(format!(
                    "Group {group_id} is not created by {account_id}"
                )));
            }

            if let PendingGroupAction::Transfer { recipient_id, .. } = action {
                if recipient_id == account_id {
                    return Err(AppError::Validation(format!(
                        "Group {group_id} cannot be transferred to its current creator"
                    )));
                }
                if self.account_repo.find_live_by_id(recipient_id).await?.is_none() {
                    return Err(AppError::Validation(format!(
                        "Recipient {recipient_id} for group {group_id} is not an active account"
                    )));
                }
            }
        }

        let covered: HashSet<&str> = payload.group_ids().collect();
        let mut missing: Vec<&str> = created
            .iter()
            .map(String::as_str)
            .filter(|id| !covered.contains(id))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(AppError::Validation(format!(
                "Groups need a transfer or delete decision: {}",
                missing.join(", ")
            )));
        }

        let encoded = payload.encode()?;

        let mut active: account::ActiveModel = account.into();
        active.is_deactivated = Set(true);
        active.deactivated_at = Set(Some(now.into()));
        active.pending_group_actions = Set(Some(encoded));
        active.updated_at = Set(Some(now.into()));
        let updated = self.account_repo.update(active).await?;

        tracing::info!(
            account_id = %account_id,
            groups = payload.actions.len(),
            "Account deletion scheduled"
        );

        Ok(updated)
    }

    /// Bring a paused account back. Locked accounts stay locked.
    pub async fn reactivate(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<account::Model> {
        let account = self
            .account_repo
            .find_any_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;

        if account.is_deleted {
            return Err(AppError::Conflict(format!(
                "Account {account_id} is deleted and cannot be reactivated"
            )));
        }

        if !account.is_deactivated && account.pending_group_actions.is_none() {
            return Ok(account);
        }

        let mut active: account::ActiveModel = account.into();
        active.is_deactivated = Set(false);
        active.deactivated_at = Set(None);
        active.pending_group_actions = Set(None);
        active.updated_at = Set(Some(now.into()));
        let updated = self.account_repo.update(active).await?;

        tracing::info!(account_id = %account_id, "Account reactivated");

        Ok(updated)
    }
}
