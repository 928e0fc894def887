//! Queue workers.
//!
//! - [`persistent`]: long-running, timer-driven, one batch per tick.
//! - [`serverless`]: one time-boxed session per invocation.
//!
//! Both delegate to [`drain::drain`] and share the rules in [`health`].

pub mod drain;
pub mod health;
pub mod persistent;
pub mod serverless;

pub use drain::{DrainBudget, DrainObserver, DrainReport, StopReason};
pub use health::WorkerHealth;
pub use persistent::{
    PersistentWorker, TickOutcome, WorkerConfig, WorkerConfigUpdate, WorkerMetrics, WorkerState,
    WorkerStatus,
};
pub use serverless::{
    ServerlessConfig, ServerlessConfigUpdate, ServerlessMetrics, ServerlessStatus,
    ServerlessWorker, SessionOutcome, SessionSummary,
};
