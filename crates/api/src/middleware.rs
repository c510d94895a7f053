//! API middleware.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lapse_common::{AppError, Config};
use lapse_core::AccountLifecycleService;
use lapse_queue::ReconciliationTrigger;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub trigger: ReconciliationTrigger,
    pub lifecycle_service: AccountLifecycleService,
    pub admin: AdminGate,
}

/// Who may call the admin routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminGate {
    /// Callers must present this bearer token.
    Token(String),
    /// No token configured; allowed because the process runs in development.
    Open,
    /// No token configured outside development.
    Closed,
}

impl AdminGate {
    /// Derive the gate from `admin.token` and `environment`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.admin.token.as_deref(), config.is_development())
    }

    #[must_use]
    pub fn new(token: Option<&str>, development: bool) -> Self {
        match token.map(str::trim) {
            Some(token) if !token.is_empty() => Self::Token(token.to_string()),
            _ if development => Self::Open,
            _ => Self::Closed,
        }
    }

    fn check(&self, headers: &HeaderMap) -> Result<(), AppError> {
        match self {
            Self::Open => Ok(()),
            Self::Closed => Err(AppError::Forbidden(
                "Admin API is disabled: no admin token configured".to_string(),
            )),
            Self::Token(expected) => match bearer_token(headers) {
                None => Err(AppError::Unauthorized),
                Some(token) if token == expected => Ok(()),
                Some(_) => Err(AppError::Forbidden("Invalid admin token".to_string())),
            },
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Admin authentication middleware.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Err(e) = state.admin.check(req.headers()) {
        tracing::warn!(path = %req.uri().path(), code = e.error_code(), "Admin request rejected");
        return e.into_response();
    }

    next.run(req).await
}
