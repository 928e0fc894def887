//! Shared queue-draining loop.
//!
//! Both workers drain the queue the same way: check depth, process one
//! batch, report it, pause, repeat. They differ only in budget. The
//! persistent worker drains one batch per timer tick; the serverless worker
//! drains until the queue is empty or its wall-clock budget runs out.
//!
//! Cancellation is cooperative. The token is checked before every batch and
//! passed into `process_queue`, where the batch classifier checks it between
//! items and chunks. A provider call already in flight always finishes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::queue::{ProcessingResult, QueueStore};
use crate::error::{AicwError, Result};

/// Limits on one drain call.
#[derive(Debug, Clone, Copy)]
pub struct DrainBudget {
    pub max_batches: Option<usize>,
    /// No new batch starts at or after this instant.
    pub deadline: Option<Instant>,
    pub inter_batch_pause: Duration,
    /// Skip the pause when less than this much budget remains.
    pub pause_guard: Duration,
}

impl DrainBudget {
    /// Exactly `n` batch attempts at most, no pause.
    #[must_use]
    pub const fn batches(n: usize) -> Self {
        Self {
            max_batches: Some(n),
            deadline: None,
            inter_batch_pause: Duration::ZERO,
            pause_guard: Duration::ZERO,
        }
    }

    /// Until `limit` has elapsed from now.
    #[must_use]
    pub fn for_duration(limit: Duration, inter_batch_pause: Duration, pause_guard: Duration) -> Self {
        Self {
            max_batches: None,
            deadline: Some(Instant::now() + limit),
            inter_batch_pause,
            pause_guard,
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn should_pause(&self) -> bool {
        if self.inter_batch_pause.is_zero() {
            return false;
        }
        self.deadline
            .is_none_or(|deadline| deadline.saturating_duration_since(Instant::now()) > self.pause_guard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QueueEmpty,
    BudgetExhausted,
    BatchLimit,
    Cancelled,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueEmpty => "queue_empty",
            Self::BudgetExhausted => "budget_exhausted",
            Self::BatchLimit => "batch_limit",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Totals of one drain call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub batches_completed: usize,
    /// Batches whose `process_queue` call returned an error.
    pub batches_failed: usize,
    pub total_processed: usize,
    pub total_successful: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
    pub elapsed_ms: u64,
    pub stop_reason: StopReason,
    pub results: Vec<ProcessingResult>,
}

impl DrainReport {
    fn new() -> Self {
        Self {
            batches_completed: 0,
            batches_failed: 0,
            total_processed: 0,
            total_successful: 0,
            total_failed: 0,
            total_skipped: 0,
            elapsed_ms: 0,
            stop_reason: StopReason::QueueEmpty,
            results: Vec::new(),
        }
    }

    fn absorb(&mut self, result: &ProcessingResult) {
        self.batches_completed += 1;
        self.total_processed += result.processed;
        self.total_successful += result.successful;
        self.total_failed += result.failed;
        self.total_skipped += result.skipped;
        self.results.push(result.clone());
    }

    /// Batch attempts, successful or not.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.batches_completed + self.batches_failed
    }
}

/// Per-batch callbacks.
#[async_trait]
pub trait DrainObserver: Send + Sync {
    /// `batch` is 1-based; `pending_before` is the depth seen before the batch.
    async fn batch_completed(&self, batch: usize, pending_before: usize, result: &ProcessingResult);

    async fn batch_failed(&self, batch: usize, error: &AicwError);
}

/// Drain `queue` within `budget`.
///
/// # Errors
///
/// Returns an error only if reading queue metrics fails. A failing
/// `process_queue` call is reported to the observer and counted.
pub async fn drain(
    queue: &dyn QueueStore,
    budget: &DrainBudget,
    cancel: &CancellationToken,
    observer: &dyn DrainObserver,
) -> Result<DrainReport> {
    let started = Instant::now();
    let mut report = DrainReport::new();

    report.stop_reason = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if budget.max_batches.is_some_and(|max| report.attempts() >= max) {
            break StopReason::BatchLimit;
        }
        if budget.deadline_passed() {
            break StopReason::BudgetExhausted;
        }

        let pending = queue.metrics().await?.pending;
        if pending == 0 {
            break StopReason::QueueEmpty;
        }

        let batch = report.attempts() + 1;
        tracing::debug!(batch, pending, "processing batch");
        match queue.process_queue(cancel).await {
            Ok(result) => {
                report.absorb(&result);
                observer.batch_completed(batch, pending, &result).await;
            }
            Err(e) => {
                report.batches_failed += 1;
                tracing::warn!(batch, error = %e, "batch failed");
                observer.batch_failed(batch, &e).await;
            }
        }

        let more_allowed = budget.max_batches.is_none_or(|max| report.attempts() < max);
        if more_allowed && budget.should_pause() {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(budget.inter_batch_pause) => {}
            }
        }
    };

    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::debug!(
        batches = report.batches_completed,
        failed_batches = report.batches_failed,
        processed = report.total_processed,
        stop_reason = report.stop_reason.as_str(),
        "drain finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedQueue;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        completed: Mutex<Vec<(usize, usize)>>,
        failed: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl DrainObserver for Recorder {
        async fn batch_completed(&self, batch: usize, pending_before: usize, _result: &ProcessingResult) {
            self.completed.lock().unwrap().push((batch, pending_before));
        }

        async fn batch_failed(&self, batch: usize, _error: &AicwError) {
            self.failed.lock().unwrap().push(batch);
        }
    }

    #[tokio::test]
    async fn empty_queue_stops_immediately() {
        let queue = ScriptedQueue::new(0, 5);
        let recorder = Recorder::default();
        let report = drain(&queue, &DrainBudget::batches(10), &CancellationToken::new(), &recorder)
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::QueueEmpty);
        assert_eq!(report.batches_completed, 0);
        assert_eq!(queue.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drains_until_empty() {
        let queue = ScriptedQueue::new(12, 5);
        let recorder = Recorder::default();
        let budget = DrainBudget::for_duration(
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        let report = drain(&queue, &budget, &CancellationToken::new(), &recorder)
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::QueueEmpty);
        assert_eq!(report.batches_completed, 3);
        assert_eq!(report.total_successful, 12);
        assert_eq!(
            *recorder.completed.lock().unwrap(),
            vec![(1, 12), (2, 7), (3, 2)]
        );
    }

    #[tokio::test]
    async fn batch_limit_is_respected() {
        let queue = ScriptedQueue::new(50, 5);
        let report = drain(
            &queue,
            &DrainBudget::batches(1),
            &CancellationToken::new(),
            &Recorder::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.stop_reason, StopReason::BatchLimit);
        assert_eq!(report.batches_completed, 1);
        assert_eq!(queue.pending(), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_new_batches() {
        let queue = ScriptedQueue::new(1000, 5).with_delay(Duration::from_secs(4));
        let budget = DrainBudget::for_duration(
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        let report = drain(&queue, &budget, &CancellationToken::new(), &Recorder::default())
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
        // Batches start at 0s, 5s (after a pause) and 9s; the pause is
        // skipped once less than 5s remain.
        assert_eq!(report.batches_completed, 3);
        assert!(report.elapsed_ms >= 13_000);
    }

    #[tokio::test]
    async fn failed_batches_are_counted_and_reported() {
        let queue = ScriptedQueue::new(10, 5);
        queue.push_reply(Err(AicwError::Storage("claim failed".to_string())));
        let recorder = Recorder::default();

        let report = drain(&queue, &DrainBudget::batches(2), &CancellationToken::new(), &recorder)
            .await
            .unwrap();
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.batches_completed, 1);
        assert_eq!(*recorder.failed.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let queue = ScriptedQueue::new(10, 5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = drain(&queue, &DrainBudget::batches(5), &cancel, &Recorder::default())
            .await
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(queue.calls(), 0);
    }

    #[tokio::test]
    async fn metrics_failure_is_an_error() {
        let queue = ScriptedQueue::new(10, 5);
        queue.fail_metrics(true);
        let result = drain(&queue, &DrainBudget::batches(1), &CancellationToken::new(), &Recorder::default()).await;
        assert!(result.is_err());
    }
}
