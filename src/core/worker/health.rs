//! Worker health rules.
//!
//! Pure functions over counters so both workers and their tests share one
//! definition. Levels only improve through [`after_batch`], and only after a
//! batch with zero failures; periodic checks can only keep or worsen them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::queue::ProcessingResult;

/// Error rate above which health is `error`.
pub const ERROR_RATE_CRITICAL: f64 = 0.5;

/// Error rate above which health is at least `warning`.
pub const ERROR_RATE_WARNING: f64 = 0.2;

/// Idle processing intervals, with work pending, before a worker counts as stuck.
pub const STUCK_INTERVALS: u32 = 3;

/// Pending depth that makes a persistent worker `warning`.
pub const PERSISTENT_BACKLOG_WARNING: usize = 1000;

/// Pending depth that makes a serverless worker `warning`.
pub const SERVERLESS_BACKLOG_WARNING: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerHealth {
    #[default]
    Healthy,
    Warning,
    Error,
}

impl WorkerHealth {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `errors / (successes + errors)`, 0.0 when nothing was attempted.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn error_rate(successes: u64, errors: u64) -> f64 {
    let total = successes + errors;
    if total == 0 {
        0.0
    } else {
        errors as f64 / total as f64
    }
}

/// Health after one batch.
#[must_use]
pub fn after_batch(current: WorkerHealth, result: &ProcessingResult) -> WorkerHealth {
    let rate = result.error_rate();
    if rate > ERROR_RATE_CRITICAL {
        WorkerHealth::Error
    } else if rate > ERROR_RATE_WARNING {
        WorkerHealth::Warning
    } else if current != WorkerHealth::Healthy && result.failed == 0 {
        WorkerHealth::Healthy
    } else {
        current
    }
}

/// Inputs of a periodic health check.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub pending: usize,
    pub successes: u64,
    pub errors: u64,
    /// Time since the last processed batch, if any batch was processed.
    pub idle: Option<Duration>,
    pub processing_interval: Duration,
    pub backlog_warning: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthAssessment {
    pub health: WorkerHealth,
    pub error_rate: f64,
    pub stuck: bool,
}

/// Level implied by the counters alone.
#[must_use]
pub fn assess(inputs: &HealthInputs) -> HealthAssessment {
    let max_idle = inputs.processing_interval * STUCK_INTERVALS;
    let stuck = inputs.pending > 0 && inputs.idle.is_some_and(|idle| idle > max_idle);
    let rate = error_rate(inputs.successes, inputs.errors);

    let health = if stuck || rate > ERROR_RATE_CRITICAL {
        WorkerHealth::Error
    } else if rate > ERROR_RATE_WARNING || inputs.pending > inputs.backlog_warning {
        WorkerHealth::Warning
    } else {
        WorkerHealth::Healthy
    };

    HealthAssessment {
        health,
        error_rate: rate,
        stuck,
    }
}

/// Fold a periodic assessment into the current level. Never improves it.
#[must_use]
pub fn after_check(current: WorkerHealth, assessed: WorkerHealth) -> WorkerHealth {
    current.max(assessed)
}
