//! Background scheduling for lapse.
//!
//! This crate decides when the reconciliation job runs:
//!
//! - **Run lock**: at most one run at a time, in-process or across instances via Redis
//! - **Trigger**: shared entry point for scheduled and manual runs
//! - **Scheduler**: recurring runs on a fixed interval, stopped by shutdown

pub mod lock;
pub mod scheduler;
pub mod trigger;

pub use lock::{LocalRunLock, RedisRunLock, RunLock, RunLockGuard};
pub use scheduler::{JobExecutor, SchedulerConfig, run_scheduler};
pub use trigger::{ReconciliationTrigger, TriggerSource};
