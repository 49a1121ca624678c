//! Monitoring engine module - executes probes and tracks monitor state
//!
//! This module is responsible for:
//! - Executing HTTP/TCP/Kubernetes checks
//! - Deciding which assigned monitors are due each sweep
//! - Running the per-monitor success/fail/retry state machine

pub mod checker;
pub mod executor;
pub mod sweep;
pub mod tracker;
pub mod types;
pub mod validation;

pub use executor::ProbeExecutor;
pub use sweep::SweepPlanner;
pub use tracker::StateTracker;
pub use types::CheckResult;
