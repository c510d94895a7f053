//! API endpoints.

mod accounts;
mod metrics;
mod reconciliation;

use axum::{Router, middleware::from_fn_with_state};

use crate::middleware::{AppState, admin_auth_middleware};

/// Create the API router. Everything under `/admin` goes through the admin gate.
pub fn router(state: &AppState) -> Router<AppState> {
    let admin = Router::new()
        .nest("/reconciliation", reconciliation::router())
        .nest("/accounts", accounts::router())
        .route_layer(from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .merge(metrics::router())
        .nest("/admin", admin)
}
