//! Explicit account and membership predicates.
//!
//! Every account read goes through an [`AccountQuery`], which carries its
//! soft-delete [`Visibility`] as a field instead of relying on an implicit
//! scope. The same predicate can be rendered as a sea-orm [`Condition`] or
//! evaluated against an in-memory model, so the database and the in-memory
//! gateway agree on which rows a query selects.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition};
use serde::{Deserialize, Serialize};

use crate::entities::group_member::GroupRole;
use crate::entities::{account, group_member};

/// Whether soft-deleted accounts are visible to a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    /// Only accounts that are not deleted.
    #[default]
    Live,
    /// Deleted accounts are returned as well.
    IncludeDeleted,
}

/// Predicate over the `account` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountQuery {
    pub visibility: Visibility,
    pub id: Option<String>,
    pub deactivated: Option<bool>,
    /// Inclusive upper bound on `deactivated_at`. Implies a non-null timestamp.
    pub deactivated_at_or_before: Option<DateTime<Utc>>,
    /// Require a non-blank pending group actions payload.
    pub has_pending_actions: Option<bool>,
}

impl AccountQuery {
    /// Accounts that are not deleted.
    #[must_use]
    pub fn live() -> Self {
        Self::default()
    }

    /// All accounts, including deleted ones.
    #[must_use]
    pub fn including_deleted() -> Self {
        Self {
            visibility: Visibility::IncludeDeleted,
            ..Self::default()
        }
    }

    /// Accounts whose grace period has elapsed and that carry a deletion request.
    #[must_use]
    pub fn eligible_for_lock(cutoff: DateTime<Utc>) -> Self {
        Self::live()
            .deactivated(true)
            .deactivated_at_or_before(cutoff)
            .with_pending_actions(true)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub const fn deactivated(mut self, deactivated: bool) -> Self {
        self.deactivated = Some(deactivated);
        self
    }

    #[must_use]
    pub const fn deactivated_at_or_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.deactivated_at_or_before = Some(cutoff);
        self
    }

    #[must_use]
    pub const fn with_pending_actions(mut self, pending: bool) -> Self {
        self.has_pending_actions = Some(pending);
        self
    }

    /// Render the predicate for sea-orm.
    #[must_use]
    pub fn condition(&self) -> Condition {
        let mut cond = Condition::all();

        if self.visibility == Visibility::Live {
            cond = cond.add(account::Column::IsDeleted.eq(false));
        }

        if let Some(id) = &self.id {
            cond = cond.add(account::Column::Id.eq(id.clone()));
        }

        if let Some(deactivated) = self.deactivated {
            cond = cond.add(account::Column::IsDeactivated.eq(deactivated));
        }

        if let Some(cutoff) = self.deactivated_at_or_before {
            cond = cond
                .add(account::Column::DeactivatedAt.is_not_null())
                .add(account::Column::DeactivatedAt.lte(cutoff));
        }

        if let Some(pending) = self.has_pending_actions {
            let present = Condition::all()
                .add(account::Column::PendingGroupActions.is_not_null())
                .add(Expr::cust(
                    r#"BTRIM("account"."pending_group_actions", E' \t\n\r') <> ''"#,
                ));
            cond = if pending {
                cond.add(present)
            } else {
                cond.add(present.not())
            };
        }

        cond
    }

    /// Evaluate the predicate against a loaded row.
    #[must_use]
    pub fn matches(&self, model: &account::Model) -> bool {
        if self.visibility == Visibility::Live && model.is_deleted {
            return false;
        }

        if self.id.as_deref().is_some_and(|id| id != model.id) {
            return false;
        }

        if self
            .deactivated
            .is_some_and(|deactivated| deactivated != model.is_deactivated)
        {
            return false;
        }

        if let Some(cutoff) = self.deactivated_at_or_before {
            match model.deactivated_at {
                Some(at) if at.with_timezone(&Utc) <= cutoff => {}
                _ => return false,
            }
        }

        if self
            .has_pending_actions
            .is_some_and(|pending| pending != model.has_pending_group_actions())
        {
            return false;
        }

        true
    }
}

/// Role restriction applied to membership reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoleFilter {
    #[default]
    Any,
    Only(GroupRole),
    Except(GroupRole),
}

impl RoleFilter {
    /// Render the filter for sea-orm.
    #[must_use]
    pub fn condition(self) -> Condition {
        match self {
            Self::Any => Condition::all(),
            Self::Only(role) => Condition::all().add(group_member::Column::Role.eq(role)),
            Self::Except(role) => Condition::all().add(group_member::Column::Role.ne(role)),
        }
    }

    #[must_use]
    pub fn matches(self, model: &group_member::Model) -> bool {
        match self {
            Self::Any => true,
            Self::Only(role) => model.role == role,
            Self::Except(role) => model.role != role,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::Account;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, EntityTrait, QueryFilter, QueryTrait};

    fn account(id: &str) -> account::Model {
        account::Model {
            id: id.to_string(),
            username: id.to_string(),
            username_lower: id.to_lowercase(),
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

    fn membership(role: GroupRole) -> group_member::Model {
        group_member::Model {
            id: "m1".to_string(),
            account_id: "a1".to_string(),
            group_id: "g1".to_string(),
            role,
            joined_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_live_excludes_deleted() {
        let mut model = account("a1");
        assert!(AccountQuery::live().matches(&model));

        model.is_deleted = true;
        assert!(!AccountQuery::live().matches(&model));
        assert!(AccountQuery::including_deleted().matches(&model));
    }

    #[test]
    fn test_eligible_boundary_is_inclusive() {
        let cutoff = Utc::now();
        let query = AccountQuery::eligible_for_lock(cutoff);

        let mut model = account("a1");
        model.is_deactivated = true;
        model.pending_group_actions = Some(r#"{"version":1,"actions":[]}"#.to_string());

        model.deactivated_at = Some(cutoff.into());
        assert!(query.matches(&model));

        model.deactivated_at = Some((cutoff + Duration::days(1)).into());
        assert!(!query.matches(&model));

        model.deactivated_at = None;
        assert!(!query.matches(&model));
    }

    #[test]
    fn test_eligible_requires_pending_actions() {
        let cutoff = Utc::now();
        let query = AccountQuery::eligible_for_lock(cutoff);

        let mut model = account("a1");
        model.is_deactivated = true;
        model.deactivated_at = Some((cutoff - Duration::days(40)).into());

        for blank in [None, Some(""), Some("   "), Some("\n\t ")] {
            model.pending_group_actions = blank.map(str::to_string);
            assert!(!query.matches(&model), "payload {blank:?} must not match");
        }
    }

    #[test]
    fn test_eligible_sql_contains_every_filter() {
        let sql = Account::find()
            .filter(AccountQuery::eligible_for_lock(Utc::now()).condition())
            .build(DatabaseBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#""account"."is_deleted" = FALSE"#));
        assert!(sql.contains(r#""account"."is_deactivated" = TRUE"#));
        assert!(sql.contains(r#""account"."deactivated_at" IS NOT NULL"#));
        assert!(sql.contains(r#""account"."deactivated_at" <="#));
        assert!(sql.contains(r#""account"."pending_group_actions" IS NOT NULL"#));
        assert!(sql.contains("BTRIM"));
    }

    #[test]
    fn test_including_deleted_sql_has_no_deleted_filter() {
        let sql = Account::find()
            .filter(AccountQuery::including_deleted().condition())
            .build(DatabaseBackend::Postgres)
            .to_string();

        assert!(!sql.contains(r#""account"."is_deleted" = FALSE"#));

        let live = Account::find()
            .filter(AccountQuery::live().condition())
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(live.contains(r#""account"."is_deleted" = FALSE"#));
    }

    #[test]
    fn test_role_filter() {
        let creator = membership(GroupRole::Creator);
        let member = membership(GroupRole::Member);

        assert!(RoleFilter::Any.matches(&creator));
        assert!(RoleFilter::Only(GroupRole::Creator).matches(&creator));
        assert!(!RoleFilter::Only(GroupRole::Creator).matches(&member));
        assert!(RoleFilter::Except(GroupRole::Creator).matches(&member));
        assert!(!RoleFilter::Except(GroupRole::Creator).matches(&creator));
    }
}
