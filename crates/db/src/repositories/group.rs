//! Group repository.

use std::sync::Arc;

use lapse_common::{AppError, AppResult};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::entities::{Group, group};

/// Repository for group operations.
#[derive(Clone)]
pub struct GroupRepository {
    db: Arc<DatabaseConnection>,
}

impl GroupRepository {
    /// Create a new group repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Groups currently owned by an account.
    pub async fn find_created_by(&self, account_id: &str) -> AppResult<Vec<group::Model>> {
        Group::find()
            .filter(group::Column::CreatorId.eq(account_id))
            .order_by_asc(group::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn create_test_group(id: &str, creator_id: &str, name: &str) -> group::Model {
        group::Model {
            id: id.to_string(),
            creator_id: creator_id.to_string(),
            name: name.to_string(),
            members_count: 1,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_created_by() {
        let grp1 = create_test_group("grp1", "acc1", "Group 1");
        let grp2 = create_test_group("grp2", "acc1", "Group 2");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[grp1, grp2]])
                .into_connection(),
        );

        let repo = GroupRepository::new(db);
        let result = repo.find_created_by("acc1").await.unwrap();

        assert_eq!(result.len(), 2);
    }
}
