//! Account repository.

use std::sync::Arc;

use crate::entities::{Account, account};
use crate::query::AccountQuery;
use lapse_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryFilter};

/// Account repository for database operations.
#[derive(Clone)]
pub struct AccountRepository {
    db: Arc<DatabaseConnection>,
}

impl AccountRepository {
    /// Create a new account repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the first account matching a query.
    pub async fn find_one(&self, query: &AccountQuery) -> AppResult<Option<account::Model>> {
        Account::find()
            .filter(query.condition())
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a live (not deleted) account by ID.
    pub async fn find_live_by_id(&self, id: &str) -> AppResult<Option<account::Model>> {
        self.find_one(&AccountQuery::live().with_id(id)).await
    }

    /// Find an account by ID regardless of its deletion state.
    pub async fn find_any_by_id(&self, id: &str) -> AppResult<Option<account::Model>> {
        self.find_one(&AccountQuery::including_deleted().with_id(id))
            .await
    }

    /// Get a live account by ID, returning an error if not found.
    pub async fn get_live_by_id(&self, id: &str) -> AppResult<account::Model> {
        self.find_live_by_id(id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
    }

    /// Update an account.
    pub async fn update(&self, model: account::ActiveModel) -> AppResult<account::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, Set};

    fn create_test_account(id: &str, username: &str) -> account::Model {
        account::Model {
            id: id.to_string(),
            username: username.to_string(),
            username_lower: username.to_lowercase(),
            email: format!("{}@example.com", username.to_lowercase()),
            name: Some("Test Account".to_string()),
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

    #[tokio::test]
    async fn test_find_live_by_id_found() {
        let acc = create_test_account("acc1", "alice");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[acc.clone()]])
                .into_connection(),
        );

        let repo = AccountRepository::new(db);
        let result = repo.find_live_by_id("acc1").await.unwrap();

        assert_eq!(result.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_get_live_by_id_not_found_returns_error() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<account::Model>::new()])
                .into_connection(),
        );

        let repo = AccountRepository::new(db);
        let result = repo.get_live_by_id("nonexistent").await;

        assert!(matches!(result, Err(AppError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_update() {
        let mut acc = create_test_account("acc1", "alice");
        acc.is_deactivated = true;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[acc.clone()]])
                .into_connection(),
        );

        let repo = AccountRepository::new(db);
        let mut active: account::ActiveModel = acc.clone().into();
        active.is_deactivated = Set(true);
        let result = repo.update(active).await.unwrap();

        assert!(result.is_deactivated);
    }
}
