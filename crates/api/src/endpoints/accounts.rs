//! Operator endpoints for the account lifecycle.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use chrono::Utc;
use lapse_common::AppResult;
use lapse_core::PendingGroupAction;
use lapse_db::entities::account;
use serde::{Deserialize, Serialize};

use crate::middleware::AppState;

/// Account lifecycle state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: String,
    pub username: String,
    pub is_deactivated: bool,
    pub deactivated_at: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<String>,
    pub deletion_scheduled: bool,
}

impl From<account::Model> for AccountResponse {
    fn from(account: account::Model) -> Self {
        Self {
            deletion_scheduled: account.has_pending_group_actions(),
            id: account.id,
            username: account.username,
            is_deactivated: account.is_deactivated,
            deactivated_at: account.deactivated_at.map(|t| t.to_rfc3339()),
            is_deleted: account.is_deleted,
            deleted_at: account.deleted_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Schedule deletion request.
#[derive(Debug, Deserialize)]
pub struct ScheduleDeletionRequest {
    #[serde(default)]
    pub actions: Vec<PendingGroupAction>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/break", post(take_break))
        .route("/{id}/schedule-deletion", post(schedule_deletion))
        .route("/{id}/reactivate", post(reactivate))
}

async fn take_break(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<AccountResponse>> {
    let account = state
        .lifecycle_service
        .deactivate_for_break(&id, Utc::now())
        .await?;
    Ok(Json(account.into()))
}

async fn schedule_deletion(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ScheduleDeletionRequest>,
) -> AppResult<Json<AccountResponse>> {
    let account = state
        .lifecycle_service
        .schedule_deletion(&id, req.actions, Utc::now())
        .await?;
    Ok(Json(account.into()))
}

async fn reactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<AccountResponse>> {
    let account = state.lifecycle_service.reactivate(&id, Utc::now()).await?;
    Ok(Json(account.into()))
}
