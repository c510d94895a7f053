//! Core business logic for lapse.
//!
//! The reconciliation job, the pending group action codec and executor, and
//! the lifecycle service that records breaks and deletion requests.

pub mod services;

pub use services::*;
