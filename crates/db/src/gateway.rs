//! Persistence gateway used by the reconciliation job.
//!
//! Reads go through [`AccountGateway`]. Writes for a single account happen
//! inside an [`AccountUnitOfWork`], which commits membership removal and the
//! account lock together. Dropping a unit of work without committing rolls it
//! back.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lapse_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait, sea_query::Expr,
};

use crate::entities::{Account, Group, GroupMember, account, group, group_member};
use crate::query::{AccountQuery, RoleFilter};

/// Read access to accounts and memberships, plus a way to open a unit of work.
#[async_trait]
pub trait AccountGateway: Send + Sync {
    /// Accounts matching the query, ordered by `deactivated_at` then `id`.
    async fn query_accounts(&self, query: &AccountQuery) -> AppResult<Vec<account::Model>>;

    /// Memberships of one account, restricted by role.
    async fn query_memberships(
        &self,
        account_id: &str,
        filter: RoleFilter,
    ) -> AppResult<Vec<group_member::Model>>;

    /// Open a unit of work scoped to one account transition.
    async fn begin(&self) -> AppResult<Box<dyn AccountUnitOfWork>>;
}

/// Writes staged for a single account, applied atomically on commit.
#[async_trait]
pub trait AccountUnitOfWork: Send {
    /// Memberships of one account as seen inside this unit of work.
    async fn memberships(
        &mut self,
        account_id: &str,
        filter: RoleFilter,
    ) -> AppResult<Vec<group_member::Model>>;

    /// Remove the given membership rows. Returns the number removed.
    async fn remove_memberships(&mut self, rows: &[group_member::Model]) -> AppResult<u64>;

    /// Persist the lifecycle fields (`is_deleted`, `deleted_at`, `updated_at`) of an account.
    async fn update_account(&mut self, account: &account::Model) -> AppResult<()>;

    /// Make every staged write visible.
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Gateway over a sea-orm connection.
#[derive(Clone)]
pub struct SeaOrmGateway {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmGateway {
    /// Create a new gateway.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountGateway for SeaOrmGateway {
    async fn query_accounts(&self, query: &AccountQuery) -> AppResult<Vec<account::Model>> {
        Account::find()
            .filter(query.condition())
            .order_by_asc(account::Column::DeactivatedAt)
            .order_by_asc(account::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn query_memberships(
        &self,
        account_id: &str,
        filter: RoleFilter,
    ) -> AppResult<Vec<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::AccountId.eq(account_id))
            .filter(filter.condition())
            .order_by_asc(group_member::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn begin(&self) -> AppResult<Box<dyn AccountUnitOfWork>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Box::new(SeaOrmUnitOfWork { txn }))
    }
}

/// Unit of work backed by a database transaction.
pub struct SeaOrmUnitOfWork {
    txn: DatabaseTransaction,
}

#[async_trait]
impl AccountUnitOfWork for SeaOrmUnitOfWork {
    async fn memberships(
        &mut self,
        account_id: &str,
        filter: RoleFilter,
    ) -> AppResult<Vec<group_member::Model>> {
        GroupMember::find()
            .filter(group_member::Column::AccountId.eq(account_id))
            .filter(filter.condition())
            .order_by_asc(group_member::Column::Id)
            .all(&self.txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn remove_memberships(&mut self, rows: &[group_member::Model]) -> AppResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = rows.iter().map(|m| m.id.clone()).collect();

        let result = GroupMember::delete_many()
            .filter(group_member::Column::Id.is_in(ids))
            .exec(&self.txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // Keep the denormalized member counts in step
        let mut per_group: BTreeMap<&str, i64> = BTreeMap::new();
        for row in rows {
            *per_group.entry(row.group_id.as_str()).or_default() += 1;
        }
        for (group_id, removed) in per_group {
            Group::update_many()
                .col_expr(
                    group::Column::MembersCount,
                    Expr::col(group::Column::MembersCount).sub(removed),
                )
                .filter(group::Column::Id.eq(group_id))
                .exec(&self.txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        Ok(result.rows_affected)
    }

    async fn update_account(&mut self, account: &account::Model) -> AppResult<()> {
        let result = Account::update_many()
            .col_expr(account::Column::IsDeleted, Expr::value(account.is_deleted))
            .col_expr(account::Column::DeletedAt, Expr::value(account.deleted_at))
            .col_expr(account::Column::UpdatedAt, Expr::value(account.updated_at))
            .filter(account::Column::Id.eq(account.id.as_str()))
            .filter(account::Column::IsDeleted.eq(false))
            .exec(&self.txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::AccountNotFound(account.id.clone()));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.txn
            .commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::group_member::GroupRole;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_account(id: &str) -> account::Model {
        account::Model {
            id: id.to_string(),
            username: id.to_string(),
            username_lower: id.to_string(),
            email: format!("{id}@example.com"),
            name: None,
            is_admin: false,
            is_deactivated: true,
            deactivated_at: Some(Utc::now().into()),
            is_deleted: false,
            deleted_at: None,
            pending_group_actions: Some("[]".to_string()),
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn create_test_membership(id: &str, role: GroupRole) -> group_member::Model {
        group_member::Model {
            id: id.to_string(),
            account_id: "acc1".to_string(),
            group_id: format!("grp-{id}"),
            role,
            joined_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_query_accounts() {
        let acc = create_test_account("acc1");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[acc.clone()]])
                .into_connection(),
        );

        let gateway = SeaOrmGateway::new(db);
        let result = gateway
            .query_accounts(&AccountQuery::eligible_for_lock(Utc::now()))
            .await
            .unwrap();

        assert_eq!(result, vec![acc]);
    }

    #[tokio::test]
    async fn test_query_memberships() {
        let member = create_test_membership("m1", GroupRole::Member);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[member.clone()]])
                .into_connection(),
        );

        let gateway = SeaOrmGateway::new(db);
        let result = gateway
            .query_memberships("acc1", RoleFilter::Except(GroupRole::Creator))
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].role, GroupRole::Member);
    }

    #[tokio::test]
    async fn test_unit_of_work_commits_removal_and_lock_together() {
        let member = create_test_membership("m1", GroupRole::Member);
        let mut acc = create_test_account("acc1");
        acc.is_deleted = true;
        acc.deleted_at = Some(Utc::now().into());

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                ])
                .into_connection(),
        );

        let gateway = SeaOrmGateway::new(db);
        let mut uow = gateway.begin().await.unwrap();
        assert_eq!(uow.remove_memberships(&[member]).await.unwrap(), 1);
        uow.update_account(&acc).await.unwrap();
        assert!(uow.commit().await.is_ok());
    }

    #[tokio::test]
    async fn test_update_account_missing_row() {
        let acc = create_test_account("gone");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let gateway = SeaOrmGateway::new(db);
        let mut uow = gateway.begin().await.unwrap();
        let result = uow.update_account(&acc).await;

        assert!(matches!(result, Err(AppError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_account_only_touches_live_rows() {
        let mut acc = create_test_account("acc1");
        acc.is_deleted = true;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let gateway = SeaOrmGateway::new(db.clone());
        let mut uow = gateway.begin().await.unwrap();
        uow.update_account(&acc).await.unwrap();
        uow.commit().await.unwrap();
        drop(gateway);

        let log = format!("{:?}", Arc::try_unwrap(db).unwrap().into_transaction_log());
        let update = &log[log.find("UPDATE").unwrap()..];
        let where_clause = &update[update.find("WHERE").unwrap()..];
        assert!(where_clause.contains("is_deleted"));
    }

    #[tokio::test]
    async fn test_remove_nothing_skips_query() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let gateway = SeaOrmGateway::new(db);
        let mut uow = gateway.begin().await.unwrap();

        assert_eq!(uow.remove_memberships(&[]).await.unwrap(), 0);
    }
}
