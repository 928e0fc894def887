//! Work queue contract.
//!
//! Workers never touch items directly: they read queue depth and ask the
//! queue to process a batch. Claiming, retry bookkeeping and result storage
//! belong to the queue implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Item counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueMetrics {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Outcome of one `process_queue` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Claimed but returned unprocessed because of cancellation.
    #[serde(default)]
    pub skipped: usize,
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    /// `failed / processed`, 0.0 for an empty batch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.failed as f64 / self.processed as f64
        }
    }
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn metrics(&self) -> Result<QueueMetrics>;

    /// Claim due items and classify them as one batch.
    ///
    /// `cancel` is passed through to the batch classifier; unstarted items
    /// go back to pending.
    async fn process_queue(&self, cancel: &CancellationToken) -> Result<ProcessingResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_handles_empty_batch() {
        assert!(ProcessingResult::default().error_rate().abs() < f64::EPSILON);
        let result = ProcessingResult {
            processed: 4,
            successful: 1,
            failed: 3,
            ..ProcessingResult::default()
        };
        assert!((result.error_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_total() {
        let metrics = QueueMetrics {
            pending: 1,
            processing: 2,
            completed: 3,
            failed: 4,
        };
        assert_eq!(metrics.total(), 10);
    }
}
