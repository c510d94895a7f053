//! HTTP API layer for lapse.
//!
//! A small operator surface over the reconciliation job:
//!
//! - **Reconciliation**: trigger a run, read recent run summaries
//! - **Accounts**: pause, schedule deletion, reactivate
//! - **Health and metrics**: liveness probe, JSON and Prometheus counters
//!
//! Admin routes are gated by a bearer token, see [`middleware::AdminGate`].

#![allow(missing_docs)]

pub mod endpoints;
pub mod middleware;

pub use endpoints::router;
pub use middleware::{AdminGate, AppState};
