//! Account entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "account")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub username: String,

    #[sea_orm(unique)]
    pub username_lower: String,

    #[sea_orm(unique)]
    pub email: String,

    /// Display name
    #[sea_orm(nullable)]
    pub name: Option<String>,

    /// Is this account an operator?
    #[sea_orm(default_value = false)]
    pub is_admin: bool,

    /// Paused by the user, either for a break or ahead of deletion.
    #[sea_orm(default_value = false)]
    pub is_deactivated: bool,

    #[sea_orm(nullable)]
    pub deactivated_at: Option<DateTimeWithTimeZone>,

    /// Permanently locked. Set only by the reconciliation job.
    #[sea_orm(default_value = false)]
    pub is_deleted: bool,

    #[sea_orm(nullable)]
    pub deleted_at: Option<DateTimeWithTimeZone>,

    /// Encoded group ownership decisions recorded with a deletion request.
    /// Present and non-blank only when the account is meant to be deleted.
    #[sea_orm(column_type = "Text", nullable)]
    pub pending_group_actions: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

/// Characters ignored when deciding whether a pending-actions payload is blank.
/// Kept in step with the `BTRIM` call in [`crate::query::AccountQuery::condition`].
pub const PAYLOAD_BLANK_CHARS: &[char] = &[' ', '\t', '\n', '\r'];

/// Whether a raw pending-actions payload records a deletion request.
#[must_use]
pub fn is_pending_payload(payload: Option<&str>) -> bool {
    payload.is_some_and(|actions| !actions.trim_matches(PAYLOAD_BLANK_CHARS).is_empty())
}

impl Model {
    /// Whether a deletion request (rather than a break) is recorded.
    #[must_use]
    pub fn has_pending_group_actions(&self) -> bool {
        is_pending_payload(self.pending_group_actions.as_deref())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::group_member::Entity")]
    Memberships,
}

impl Related<super::group_member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memberships.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
