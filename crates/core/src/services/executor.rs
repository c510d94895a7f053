//! Pending group action execution.
//!
//! Runs the ownership decisions recorded with a deletion request. The whole
//! payload for one account is applied in a single transaction, so either every
//! action lands or none does. Actions that already took effect are skipped,
//! which keeps a retry after a failed run safe.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapse_common::{AppError, AppResult, IdGenerator};
use lapse_db::AccountQuery;
use lapse_db::entities::group_member::GroupRole;
use lapse_db::entities::{Account, Group, GroupMember, group, group_member};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, TransactionTrait, sea_query::Expr,
};
use serde::Serialize;

use super::pending_actions::{PendingGroupAction, PendingGroupActions};

/// What happened to the actions of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionsReport {
    pub transferred: u64,
    pub deleted: u64,
    /// Actions that had already taken effect.
    pub already_applied: u64,
}

impl ActionsReport {
    /// Actions that changed the store in this call.
    #[must_use]
    pub const fn executed(&self) -> u64 {
        self.transferred + self.deleted
    }
}

/// Executes the pending group actions recorded for an account.
#[async_trait]
pub trait PendingActionExecutor: Send + Sync {
    /// Apply every action in `payload` on behalf of `account_id`.
    async fn execute_pending_actions(
        &self,
        account_id: &str,
        payload: &str,
    ) -> AppResult<ActionsReport>;
}

/// Shared executor handle.
pub type ActionExecutorService = Arc<dyn PendingActionExecutor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Changed,
    AlreadyDone,
}

/// Executor backed by the groups tables.
#[derive(Clone)]
pub struct GroupActionExecutor {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
}

impl GroupActionExecutor {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
        }
    }

    async fn transfer<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: &str,
        group_id: &str,
        recipient_id: &str,
    ) -> AppResult<Applied> {
        if recipient_id == account_id {
            return Err(AppError::Validation(format!(
                "Group {group_id} cannot be transferred to its current creator"
            )));
        }

        let group = Group::find_by_id(group_id)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Group not found: {group_id}")))?;

        if group.creator_id == recipient_id {
            return Ok(Applied::AlreadyDone);
        }
        if group.creator_id != account_id {
            return Err(AppError::Forbidden(format!(
                "Group {group_id} is not created by {account_id}"
            )));
        }

        Account::find()
            .filter(AccountQuery::live().with_id(recipient_id).condition())
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::AccountNotFound(recipient_id.to_string()))?;

        let now = Utc::now();

        let mut active: group::ActiveModel = group.into();
        active.creator_id = Set(recipient_id.to_string());
        active.updated_at = Set(Some(now.into()));
        active
            .update(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // The departing creator stays a plain member until its memberships are pruned
        let departing = GroupMember::find()
            .filter(group_member::Column::GroupId.eq(group_id))
            .filter(group_member::Column::AccountId.eq(account_id))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        if let Some(member) = departing {
            let mut active: group_member::ActiveModel = member.into();
            active.role = Set(GroupRole::Member);
            active
                .update(conn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        let existing = GroupMember::find()
            .filter(group_member::Column::GroupId.eq(group_id))
            .filter(group_member::Column::AccountId.eq(recipient_id))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(member) = existing {
            let mut active: group_member::ActiveModel = member.into();
            active.role = Set(GroupRole::Creator);
            active
                .update(conn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        } else {
            group_member::ActiveModel {
                id: Set(self.id_gen.generate()),
                account_id: Set(recipient_id.to_string()),
                group_id: Set(group_id.to_string()),
                role: Set(GroupRole::Creator),
                joined_at: Set(now.into()),
            }
            .insert(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

            Group::update_many()
                .col_expr(
                    group::Column::MembersCount,
                    Expr::col(group::Column::MembersCount).add(1),
                )
                .filter(group::Column::Id.eq(group_id))
                .exec(conn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        Ok(Applied::Changed)
    }

    async fn delete<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: &str,
        group_id: &str,
    ) -> AppResult<Applied> {
        let Some(group) = Group::find_by_id(group_id)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        else {
            return Ok(Applied::AlreadyDone);
        };

        if group.creator_id != account_id {
            return Err(AppError::Forbidden(format!(
                "Group {group_id} is not created by {account_id}"
            )));
        }

        GroupMember::delete_many()
            .filter(group_member::Column::GroupId.eq(group_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Group::delete_by_id(group_id)
            .exec(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Applied::Changed)
    }
}

#[async_trait]
impl PendingActionExecutor for GroupActionExecutor {
    async fn execute_pending_actions(
        &self,
        account_id: &str,
        payload: &str,
    ) -> AppResult<ActionsReport> {
        let actions = PendingGroupActions::decode(payload)?;
        let mut report = ActionsReport::default();

        if actions.actions.is_empty() {
            return Ok(report);
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        for action in &actions.actions {
            let applied = match action {
                PendingGroupAction::Transfer {
                    group_id,
                    recipient_id,
                } => {
                    let applied = self
                        .transfer(&txn, account_id, group_id, recipient_id)
                        .await?;
                    if applied == Applied::Changed {
                        report.transferred += 1;
                    }
                    applied
                }
                PendingGroupAction::Delete { group_id } => {
                    let applied = self.delete(&txn, account_id, group_id).await?;
                    if applied == Applied::Changed {
                        report.deleted += 1;
                    }
                    applied
                }
            };

            if applied == Applied::AlreadyDone {
                report.already_applied += 1;
            }

            tracing::debug!(
                account_id = %account_id,
                group_id = %action.group_id(),
                ?applied,
                "Pending group action applied"
            );
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lapse_db::entities::account;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_group(id: &str, creator_id: &str) -> group::Model {
        group::Model {
            id: id.to_string(),
            creator_id: creator_id.to_string(),
            name: format!("Group {id}"),
            members_count: 2,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn create_test_account(id: &str) -> account::Model {
        account::Model {
            id: id.to_string(),
            username: id.to_string(),
            username_lower: id.to_string(),
            email: format!("{id}@example.com"),
            name: None,
            is_admin: false,
            is_deactivated: false,
            deactivated_at: None,
            is_deleted: false,
            deleted_at: None,
            pending_group_actions: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn create_test_member(id: &str, account_id: &str, role: GroupRole) -> group_member::Model {
        group_member::Model {
            id: id.to_string(),
            account_id: account_id.to_string(),
            group_id: "grp1".to_string(),
            role,
            joined_at: Utc::now().into(),
        }
    }

    fn exec_ok() -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_before_touching_store() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let executor = GroupActionExecutor::new(db);

        let result = executor.execute_pending_actions("acc1", "not json").await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_actions_succeed() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let executor = GroupActionExecutor::new(db);

        let report = executor
            .execute_pending_actions("acc1", r#"{"version":1,"actions":[]}"#)
            .await
            .unwrap();

        assert_eq!(report, ActionsReport::default());
    }

    #[tokio::test]
    async fn test_delete_absent_group_is_noop() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<group::Model>::new()])
                .into_connection(),
        );
        let executor = GroupActionExecutor::new(db);

        let report = executor
            .execute_pending_actions("acc1", r#"[{"type":"delete","groupId":"grp1"}]"#)
            .await
            .unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(report.already_applied, 1);
    }

    #[tokio::test]
    async fn test_delete_owned_group() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_group("grp1", "acc1")]])
                .append_exec_results([exec_ok(), exec_ok()])
                .into_connection(),
        );
        let executor = GroupActionExecutor::new(db);

        let report = executor
            .execute_pending_actions("acc1", r#"[{"type":"delete","groupId":"grp1"}]"#)
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.executed(), 1);
    }

    #[tokio::test]
    async fn test_delete_foreign_group_is_forbidden() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_group("grp1", "someone-else")]])
                .into_connection(),
        );
        let executor = GroupActionExecutor::new(db);

        let result = executor
            .execute_pending_actions("acc1", r#"[{"type":"delete","groupId":"grp1"}]"#)
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_transfer_already_owned_by_recipient_is_noop() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_group("grp1", "acc2")]])
                .into_connection(),
        );
        let executor = GroupActionExecutor::new(db);

        let report = executor
            .execute_pending_actions(
                "acc1",
                r#"[{"type":"transfer","groupId":"grp1","recipientId":"acc2"}]"#,
            )
            .await
            .unwrap();

        assert_eq!(report.transferred, 0);
        assert_eq!(report.already_applied, 1);
    }

    #[tokio::test]
    async fn test_transfer_to_deleted_recipient_fails() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_group("grp1", "acc1")]])
                .append_query_results([Vec::<account::Model>::new()])
                .into_connection(),
        );
        let executor = GroupActionExecutor::new(db);

        let result = executor
            .execute_pending_actions(
                "acc1",
                r#"[{"type":"transfer","groupId":"grp1","recipientId":"acc2"}]"#,
            )
            .await;

        assert!(matches!(result, Err(AppError::AccountNotFound(id)) if id == "acc2"));
    }

    #[tokio::test]
    async fn test_transfer_to_existing_member() {
        let mut transferred = create_test_group("grp1", "acc2");
        transferred.updated_at = Some(Utc::now().into());

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_group("grp1", "acc1")]])
                .append_query_results([[create_test_account("acc2")]])
                .append_query_results([[transferred]])
                .append_query_results([[create_test_member("m1", "acc1", GroupRole::Creator)]])
                .append_query_results([[create_test_member("m1", "acc1", GroupRole::Member)]])
                .append_query_results([[create_test_member("m2", "acc2", GroupRole::Member)]])
                .append_query_results([[create_test_member("m2", "acc2", GroupRole::Creator)]])
                .into_connection(),
        );
        let executor = GroupActionExecutor::new(db);

        let report = executor
            .execute_pending_actions(
                "acc1",
                r#"[{"type":"transfer","groupId":"grp1","recipientId":"acc2"}]"#,
            )
            .await
            .unwrap();

        assert_eq!(report.transferred, 1);
        assert_eq!(report.already_applied, 0);
    }

    #[tokio::test]
    async fn test_transfer_to_self_is_rejected() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let executor = GroupActionExecutor::new(db);

        let result = executor
            .execute_pending_actions(
                "acc1",
                r#"[{"type":"transfer","groupId":"grp1","recipientId":"acc1"}]"#,
            )
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
