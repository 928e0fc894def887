//! Long-running background worker.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//!
//! While running, two tasks are alive: a processing loop that sleeps one
//! `processing_interval`, runs a cycle, and re-arms; and a health loop that
//! re-assesses health every `health_check_interval`. A cycle is guarded so
//! at most one runs per worker, whether triggered by the timer or by a
//! manual [`PersistentWorker::tick`]. `stop` cancels the run token, then
//! waits for the loops and any in-flight cycle to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::queue::{ProcessingResult, QueueStore};
use crate::core::resources;
use crate::core::sinks::{EventStatus, MetricsSnapshot, Sinks, WorkerEvent, WorkerEventKind};
use crate::core::worker::drain::{DrainBudget, DrainObserver, drain};
use crate::core::worker::health::{self, HealthInputs, PERSISTENT_BACKLOG_WARNING, WorkerHealth};
use crate::error::{AicwError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Reported in metrics snapshots; the queue decides the actual claim size.
    pub batch_size: usize,
    pub processing_interval: Duration,
    pub health_check_interval: Duration,
    pub auto_start: bool,
    pub restart_pause: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 5,
            processing_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            auto_start: true,
            restart_pause: Duration::from_secs(2),
        }
    }
}

/// Partial config change. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerConfigUpdate {
    pub enabled: Option<bool>,
    pub batch_size: Option<usize>,
    pub processing_interval: Option<Duration>,
    pub health_check_interval: Option<Duration>,
    pub auto_start: Option<bool>,
    pub restart_pause: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl WorkerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub is_running: bool,
    pub is_processing: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub processed_count: u64,
    pub error_count: u64,
    pub health: WorkerHealth,
    pub uptime_ms: u64,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetrics {
    pub total_processed: u64,
    pub total_errors: u64,
    pub average_processing_time_ms: f64,
    pub batches_completed: u64,
    pub success_rate: f64,
    pub uptime_ms: u64,
}

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessing,
    ShuttingDown,
}

/// Result of one processing cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    /// Queue had nothing pending.
    Idle,
    Processed(ProcessingResult),
    Failed(String),
}

#[derive(Debug)]
struct Counters {
    state: WorkerState,
    health: WorkerHealth,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    last_processed_at: Option<DateTime<Utc>>,
    last_processed_instant: Option<Instant>,
    next_scheduled_at: Option<DateTime<Utc>>,
    processed_count: u64,
    error_count: u64,
    batches_completed: u64,
    total_processing_ms: u64,
}

impl Counters {
    const fn new() -> Self {
        Self {
            state: WorkerState::Stopped,
            health: WorkerHealth::Healthy,
            started_at: None,
            started_instant: None,
            last_processed_at: None,
            last_processed_instant: None,
            next_scheduled_at: None,
            processed_count: 0,
            error_count: 0,
            batches_completed: 0,
            total_processing_ms: 0,
        }
    }

    fn uptime_ms(&self) -> u64 {
        self.started_instant.map_or(0, |started| {
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
        })
    }
}

struct RunHandles {
    cancel: CancellationToken,
    processing: JoinHandle<()>,
    health: JoinHandle<()>,
}

struct Inner {
    queue: Arc<dyn QueueStore>,
    sinks: Sinks,
    config: RwLock<WorkerConfig>,
    counters: Mutex<Counters>,
    is_processing: AtomicBool,
    cycle: tokio::sync::Mutex<()>,
    rearm: Notify,
    run: Mutex<Option<RunHandles>>,
}

/// Background worker handle. Cheap to clone.
#[derive(Clone)]
pub struct PersistentWorker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PersistentWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentWorker")
            .field("config", &self.config())
            .field("state", &self.inner.counters().state)
            .finish_non_exhaustive()
    }
}

impl PersistentWorker {
    #[must_use]
    pub fn new(queue: Arc<dyn QueueStore>, sinks: Sinks, config: WorkerConfig) -> Self {
        tracing::debug!(
            enabled = config.enabled,
            batch_size = config.batch_size,
            interval_secs = config.processing_interval.as_secs(),
            auto_start = config.auto_start,
            "worker initialized"
        );
        Self {
            inner: Arc::new(Inner {
                queue,
                sinks,
                config: RwLock::new(config),
                counters: Mutex::new(Counters::new()),
                is_processing: AtomicBool::new(false),
                cycle: tokio::sync::Mutex::new(()),
                rearm: Notify::new(),
                run: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> WorkerConfig {
        self.inner.config()
    }

    /// Start if the config says both `enabled` and `auto_start`.
    ///
    /// # Errors
    ///
    /// Propagates [`PersistentWorker::start`] errors.
    pub async fn auto_start(&self) -> Result<bool> {
        let config = self.config();
        if config.enabled && config.auto_start {
            self.start().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Arm the processing and health timers.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::WorkerState`] when disabled or not stopped.
    pub async fn start(&self) -> Result<()> {
        if !self.config().enabled {
            return Err(AicwError::WorkerState(
                "worker is disabled in configuration".to_string(),
            ));
        }
        {
            let mut counters = self.inner.counters();
            if counters.state != WorkerState::Stopped {
                return Err(AicwError::WorkerState(format!(
                    "worker is already {}",
                    counters.state.as_str()
                )));
            }
            counters.state = WorkerState::Starting;
        }

        let cancel = CancellationToken::new();
        {
            let mut counters = self.inner.counters();
            counters.state = WorkerState::Running;
            counters.health = WorkerHealth::Healthy;
            counters.started_at = Some(Utc::now());
            counters.started_instant = Some(Instant::now());
        }

        let processing = tokio::spawn(processing_loop(Arc::clone(&self.inner), cancel.clone()));
        let health = tokio::spawn(health_loop(Arc::clone(&self.inner), cancel.clone()));
        *self.inner.run_slot() = Some(RunHandles {
            cancel,
            processing,
            health,
        });

        self.inner
            .sinks
            .log_event(WorkerEvent::new(
                WorkerEventKind::WorkerStart,
                EventStatus::Success,
                "AI processing worker started",
            ))
            .await;
        tracing::info!("worker started");
        Ok(())
    }

    /// Stop scheduling and wait for any in-flight cycle to finish.
    ///
    /// Cooperative: items already sent to a provider complete; items not yet
    /// started are returned to the queue. Stopping a stopped worker is a no-op.
    pub async fn stop(&self) {
        {
            let mut counters = self.inner.counters();
            if counters.state != WorkerState::Running {
                tracing::debug!(state = counters.state.as_str(), "stop ignored; worker not running");
                return;
            }
            counters.state = WorkerState::Stopping;
            counters.next_scheduled_at = None;
        }
        tracing::info!("stopping worker");

        let handles = self.inner.run_slot().take();
        if let Some(handles) = handles {
            handles.cancel.cancel();
            for (name, handle) in [("processing", handles.processing), ("health", handles.health)] {
                if let Err(e) = handle.await {
                    tracing::warn!(task = name, error = %e, "worker task ended abnormally");
                }
            }
        }
        // A manual tick may still hold the cycle.
        drop(self.inner.cycle.lock().await);

        {
            let mut counters = self.inner.counters();
            counters.state = WorkerState::Stopped;
            counters.health = WorkerHealth::Healthy;
        }
        self.inner.is_processing.store(false, Ordering::Release);

        self.inner
            .sinks
            .log_event(WorkerEvent::new(
                WorkerEventKind::WorkerStop,
                EventStatus::Success,
                "AI processing worker stopped",
            ))
            .await;
        tracing::info!("worker stopped");
    }

    /// `stop`, pause for `restart_pause`, `start`.
    ///
    /// # Errors
    ///
    /// Propagates [`PersistentWorker::start`] errors.
    pub async fn restart(&self) -> Result<()> {
        tracing::info!("restarting worker");
        self.stop().await;
        tokio::time::sleep(self.config().restart_pause).await;
        self.start().await
    }

    /// Run one processing cycle now.
    pub async fn tick(&self) -> TickOutcome {
        self.inner.tick().await
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        let counters = self.inner.counters();
        let running = counters.state == WorkerState::Running;
        WorkerStatus {
            state: counters.state,
            is_running: running,
            is_processing: self.inner.is_processing.load(Ordering::Acquire),
            started_at: counters.started_at,
            last_processed_at: counters.last_processed_at,
            processed_count: counters.processed_count,
            error_count: counters.error_count,
            health: counters.health,
            uptime_ms: counters.uptime_ms(),
            next_scheduled_at: if running { counters.next_scheduled_at } else { None },
        }
    }

    #[must_use]
    pub fn metrics(&self) -> WorkerMetrics {
        let counters = self.inner.counters();
        #[allow(clippy::cast_precision_loss)]
        let average_processing_time_ms = if counters.batches_completed == 0 {
            0.0
        } else {
            counters.total_processing_ms as f64 / counters.batches_completed as f64
        };
        WorkerMetrics {
            total_processed: counters.processed_count,
            total_errors: counters.error_count,
            average_processing_time_ms,
            batches_completed: counters.batches_completed,
            success_rate: 1.0 - health::error_rate(counters.processed_count, counters.error_count),
            uptime_ms: counters.uptime_ms(),
        }
    }

    /// Merge `update` into the config. A changed interval takes effect from
    /// the next scheduling decision.
    pub fn update_config(&self, update: WorkerConfigUpdate) {
        let (old, new) = {
            let mut config = self.inner.config.write().unwrap_or_else(PoisonError::into_inner);
            let old = *config;
            *config = WorkerConfig {
                enabled: update.enabled.unwrap_or(old.enabled),
                batch_size: update.batch_size.unwrap_or(old.batch_size).max(1),
                processing_interval: update
                    .processing_interval
                    .unwrap_or(old.processing_interval),
                health_check_interval: update
                    .health_check_interval
                    .unwrap_or(old.health_check_interval),
                auto_start: update.auto_start.unwrap_or(old.auto_start),
                restart_pause: update.restart_pause.unwrap_or(old.restart_pause),
            };
            (old, *config)
        };
        tracing::info!(old = ?old, new = ?new, "worker config updated");

        if old.processing_interval != new.processing_interval {
            self.inner.rearm.notify_one();
        }
    }
}

impl Inner {
    fn config(&self) -> WorkerConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_slot(&self) -> MutexGuard<'_, Option<RunHandles>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_token(&self) -> CancellationToken {
        self.run_slot()
            .as_ref()
            .map_or_else(CancellationToken::new, |handles| handles.cancel.clone())
    }

    async fn tick(&self) -> TickOutcome {
        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::debug!("skipping cycle; already in progress");
            return TickOutcome::Skipped(SkipReason::AlreadyProcessing);
        };
        if self.counters().state == WorkerState::Stopping {
            return TickOutcome::Skipped(SkipReason::ShuttingDown);
        }

        self.is_processing.store(true, Ordering::Release);
        let cancel = self.run_token();
        let outcome = match drain(self.queue.as_ref(), &DrainBudget::batches(1), &cancel, self).await {
            Ok(report) => match report.results.into_iter().next() {
                Some(result) => TickOutcome::Processed(result),
                None if report.batches_failed > 0 => {
                    TickOutcome::Failed("queue processing failed".to_string())
                }
                None => TickOutcome::Idle,
            },
            Err(e) => {
                self.record_cycle_error(&e).await;
                TickOutcome::Failed(e.to_string())
            }
        };
        self.is_processing.store(false, Ordering::Release);
        outcome
    }

    async fn record_cycle_error(&self, error: &AicwError) {
        {
            let mut counters = self.counters();
            counters.error_count += 1;
            counters.health = WorkerHealth::Error;
        }
        tracing::error!(error = %error, error_code = error.error_code(), "worker cycle failed");
        self.sinks
            .log_event(
                WorkerEvent::new(
                    WorkerEventKind::WorkerBatchError,
                    EventStatus::Error,
                    format!("Batch processing failed: {error}"),
                )
                .with_details(serde_json::json!({ "error": error.to_string() })),
            )
            .await;
    }

    async fn health_check(&self) {
        let config = self.config();
        let metrics = match self.queue.metrics().await {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!(error = %e, "health check failed");
                self.counters().health = WorkerHealth::Error;
                return;
            }
        };

        let (previous, assessment, next) = {
            let mut counters = self.counters();
            let assessment = health::assess(&HealthInputs {
                pending: metrics.pending,
                successes: counters.processed_count,
                errors: counters.error_count,
                idle: counters.last_processed_instant.map(|at| at.elapsed()),
                processing_interval: config.processing_interval,
                backlog_warning: PERSISTENT_BACKLOG_WARNING,
            });
            let previous = counters.health;
            counters.health = health::after_check(previous, assessment.health);
            (previous, assessment, counters.health)
        };

        if next != previous {
            tracing::warn!(from = %previous, to = %next, stuck = assessment.stuck, "worker health changed");
            self.sinks
                .log_event(
                    WorkerEvent::new(
                        WorkerEventKind::WorkerHealthCheck,
                        EventStatus::Warning,
                        format!("Worker health changed from {previous} to {next}"),
                    )
                    .with_details(serde_json::json!({
                        "previousHealth": previous,
                        "newHealth": next,
                        "queueMetrics": metrics,
                        "errorRate": assessment.error_rate,
                        "isStuck": assessment.stuck,
                    })),
                )
                .await;
        }
    }
}

#[async_trait]
impl DrainObserver for Inner {
    async fn batch_completed(&self, _batch: usize, pending_before: usize, result: &ProcessingResult) {
        let config = self.config();
        let worker_status = {
            let mut counters = self.counters();
            counters.processed_count += result.successful as u64;
            counters.error_count += result.failed as u64;
            counters.batches_completed += 1;
            counters.total_processing_ms += result.processing_time_ms;
            counters.last_processed_at = Some(Utc::now());
            counters.last_processed_instant = Some(Instant::now());
            counters.health
        };

        let status = if result.failed > 0 {
            EventStatus::Warning
        } else {
            EventStatus::Success
        };
        self.sinks
            .log_event(
                WorkerEvent::new(
                    WorkerEventKind::WorkerBatchComplete,
                    status,
                    format!(
                        "Processed batch: {} successful, {} failed",
                        result.successful, result.failed
                    ),
                )
                .with_details(serde_json::json!({
                    "result": result,
                    "processingTimeMs": result.processing_time_ms,
                })),
            )
            .await;

        self.sinks
            .record_metrics(&snapshot(&config, pending_before, result, worker_status))
            .await;

        let mut counters = self.counters();
        counters.health = health::after_batch(counters.health, result);
        tracing::info!(
            successful = result.successful,
            failed = result.failed,
            processing_time_ms = result.processing_time_ms,
            health = %counters.health,
            "worker batch completed"
        );
    }

    async fn batch_failed(&self, _batch: usize, error: &AicwError) {
        self.record_cycle_error(error).await;
    }
}

fn snapshot(
    config: &WorkerConfig,
    pending_before: usize,
    result: &ProcessingResult,
    worker_status: WorkerHealth,
) -> MetricsSnapshot {
    #[allow(clippy::cast_precision_loss)]
    let throughput = (result.processing_time_ms > 0)
        .then(|| result.processed as f64 / (result.processing_time_ms as f64 / 1000.0));
    MetricsSnapshot {
        timestamp: Utc::now(),
        batch_size: config.batch_size,
        processed_count: result.processed,
        success_count: result.successful,
        error_count: result.failed,
        processing_time_ms: result.processing_time_ms,
        queue_depth: pending_before.saturating_sub(result.processed),
        worker_status: worker_status.as_str().to_string(),
        provider_id: None,
        throughput,
        average_latency_ms: None,
        error_rate: Some(result.error_rate()),
        memory_usage: resources::resident_memory_bytes(),
    }
}

async fn processing_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        let interval = inner.config().processing_interval;
        inner.counters().next_scheduled_at =
            chrono::Duration::from_std(interval).ok().map(|d| Utc::now() + d);

        tokio::select! {
            () = cancel.cancelled() => break,
            () = inner.rearm.notified() => {
                tracing::debug!("processing timer re-armed");
                continue;
            }
            () = tokio::time::sleep(interval) => {}
        }

        if let TickOutcome::Failed(message) = inner.tick().await {
            tracing::debug!(%message, "cycle failed; timer re-armed");
        }
    }
}

async fn health_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        let interval = inner.config().health_check_interval;
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => inner.health_check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sinks::WorkerEventKind as Kind;
    use crate::test_utils::{RecordingSink, ScriptedQueue};

    fn enabled_config() -> WorkerConfig {
        WorkerConfig {
            enabled: true,
            batch_size: 5,
            processing_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            auto_start: true,
            restart_pause: Duration::from_secs(2),
        }
    }

    fn worker(queue: &Arc<ScriptedQueue>, sink: &Arc<RecordingSink>) -> PersistentWorker {
        PersistentWorker::new(
            Arc::clone(queue) as Arc<dyn QueueStore>,
            sink.sinks(),
            enabled_config(),
        )
    }

    #[tokio::test]
    async fn disabled_worker_refuses_to_start() {
        let queue = Arc::new(ScriptedQueue::new(0, 5));
        let worker = PersistentWorker::new(queue, Sinks::tracing(), WorkerConfig::default());
        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, AicwError::WorkerState(_)));
        assert!(!worker.auto_start().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected() {
        let queue = Arc::new(ScriptedQueue::new(0, 5));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        worker.start().await.unwrap();
        assert!(worker.start().await.is_err());
        assert_eq!(worker.status().state, WorkerState::Running);
        worker.stop().await;
        assert_eq!(worker.status().state, WorkerState::Stopped);
        assert_eq!(sink.kinds(), vec![Kind::WorkerStart, Kind::WorkerStop]);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_cycles() {
        let queue = Arc::new(ScriptedQueue::new(12, 5));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(95)).await;
        worker.stop().await;

        assert_eq!(queue.pending(), 0);
        let status = worker.status();
        assert_eq!(status.processed_count, 12);
        assert!(status.last_processed_at.is_some());
        assert_eq!(sink.count(Kind::WorkerBatchComplete), 3);
        assert_eq!(sink.snapshots().len(), 3);
        assert_eq!(sink.snapshots()[0].queue_depth, 7);
        assert_eq!(worker.metrics().batches_completed, 3);
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let queue = Arc::new(ScriptedQueue::new(0, 5));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        assert_eq!(worker.tick().await, TickOutcome::Idle);
        assert_eq!(queue.calls(), 0);
        assert!(sink.snapshots().is_empty());
    }

    #[tokio::test]
    async fn overlapping_ticks_are_skipped() {
        let queue = Arc::new(ScriptedQueue::new(1000, 5).with_delay(Duration::from_millis(50)));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        let ticks: Vec<_> = (0..100)
            .map(|_| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.tick().await })
            })
            .collect();
        let mut processed = 0;
        let mut skipped = 0;
        for tick in ticks {
            match tick.await.unwrap() {
                TickOutcome::Processed(_) => processed += 1,
                TickOutcome::Skipped(SkipReason::AlreadyProcessing) => skipped += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(queue.calls(), processed);
        assert!(processed >= 1);
        assert_eq!(processed + skipped, 100);
        assert!(!worker.status().is_processing);
    }

    #[tokio::test]
    async fn failed_batch_sets_error_then_clean_batch_recovers() {
        let queue = Arc::new(ScriptedQueue::new(20, 5));
        queue.push_reply(Ok(ProcessingResult {
            processed: 5,
            successful: 2,
            failed: 3,
            skipped: 0,
            processing_time_ms: 10,
        }));
        queue.push_reply(Ok(ProcessingResult {
            processed: 10,
            successful: 9,
            failed: 1,
            skipped: 0,
            processing_time_ms: 10,
        }));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        worker.tick().await;
        assert_eq!(worker.status().health, WorkerHealth::Error);
        worker.tick().await;
        assert_eq!(worker.status().health, WorkerHealth::Error, "one failure blocks recovery");
        worker.tick().await;
        assert_eq!(worker.status().health, WorkerHealth::Healthy);
    }

    #[tokio::test]
    async fn queue_error_is_recorded_not_fatal() {
        let queue = Arc::new(ScriptedQueue::new(10, 5));
        queue.push_reply(Err(AicwError::Storage("lease expired".to_string())));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        assert!(matches!(worker.tick().await, TickOutcome::Failed(_)));
        let status = worker.status();
        assert_eq!(status.health, WorkerHealth::Error);
        assert_eq!(status.error_count, 1);
        assert_eq!(sink.count(Kind::WorkerBatchError), 1);

        assert!(matches!(worker.tick().await, TickOutcome::Processed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_cycle() {
        let queue = Arc::new(ScriptedQueue::new(10, 5).with_delay(Duration::from_secs(20)));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        worker.start().await.unwrap();
        // First cycle fires at 30s and runs until 50s.
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(worker.status().is_processing);

        worker.stop().await;
        assert_eq!(sink.count(Kind::WorkerBatchComplete), 1);
        assert_eq!(*sink.kinds().last().unwrap(), Kind::WorkerStop);
        assert!(!worker.status().is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_flags_stuck_worker() {
        let queue = Arc::new(ScriptedQueue::new(10, 5));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        worker.tick().await;
        queue.set_pending(50);
        tokio::time::advance(Duration::from_secs(91)).await;
        worker.inner.health_check().await;

        assert_eq!(worker.status().health, WorkerHealth::Error);
        assert_eq!(sink.count(Kind::WorkerHealthCheck), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_update_rearms_timer() {
        let queue = Arc::new(ScriptedQueue::new(10, 5));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        worker.update_config(WorkerConfigUpdate {
            processing_interval: Some(Duration::from_secs(5)),
            ..WorkerConfigUpdate::default()
        });
        tokio::time::sleep(Duration::from_secs(7)).await;
        worker.stop().await;

        assert_eq!(sink.count(Kind::WorkerBatchComplete), 1);
        assert_eq!(worker.config().processing_interval, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cycles_lifecycle() {
        let queue = Arc::new(ScriptedQueue::new(0, 5));
        let sink = Arc::new(RecordingSink::new());
        let worker = worker(&queue, &sink);

        worker.start().await.unwrap();
        worker.restart().await.unwrap();
        assert_eq!(worker.status().state, WorkerState::Running);
        worker.stop().await;
        assert_eq!(
            sink.kinds(),
            vec![Kind::WorkerStart, Kind::WorkerStop, Kind::WorkerStart, Kind::WorkerStop]
        );
    }
}
