//! Operator endpoints for the reconciliation job.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use lapse_common::AppResult;
use lapse_core::RunSummary;
use lapse_queue::TriggerSource;

use crate::middleware::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", post(run_now))
        .route("/runs", get(recent_runs))
}

/// Run reconciliation now and return its summary.
async fn run_now(State(state): State<AppState>) -> AppResult<Json<RunSummary>> {
    let summary = state.trigger.trigger(TriggerSource::Manual).await?;
    Ok(Json(summary))
}

/// Recent run summaries, newest first.
async fn recent_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    Json(state.trigger.history().recent().await)
}
