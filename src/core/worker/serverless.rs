//! Invocation-scoped worker.
//!
//! Each [`ServerlessWorker::run`] is one session: drain the queue until it is
//! empty or the wall-clock budget runs out, then return a summary. At most
//! one session runs per worker; a second call while one is active returns
//! immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::queue::{ProcessingResult, QueueMetrics, QueueStore};
use crate::core::resources;
use crate::core::sinks::{EventStatus, MetricsSnapshot, Sinks, WorkerEvent, WorkerEventKind};
use crate::core::worker::drain::{DrainBudget, DrainObserver, DrainReport, StopReason, drain};
use crate::core::worker::health::{self, HealthInputs, SERVERLESS_BACKLOG_WARNING, WorkerHealth};
use crate::error::{AicwError, Result};

/// Rough per-item time used for completion estimates.
const ESTIMATED_ITEM_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerlessConfig {
    pub enabled: bool,
    pub batch_size: usize,
    /// Wall-clock budget of one session. No batch starts after it elapses.
    pub max_processing_time: Duration,
    pub inter_batch_pause: Duration,
    /// The pause is skipped when less than this much budget remains.
    pub pause_guard: Duration,
}

impl Default for ServerlessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 5,
            max_processing_time: Duration::from_secs(480),
            inter_batch_pause: Duration::from_secs(1),
            pause_guard: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerlessConfigUpdate {
    pub enabled: Option<bool>,
    pub batch_size: Option<usize>,
    pub max_processing_time: Option<Duration>,
    pub inter_batch_pause: Option<Duration>,
    pub pause_guard: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_processed: usize,
    pub total_successful: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
    /// Batch attempts, including the ones that failed.
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub processing_time_ms: u64,
    pub stop_reason: StopReason,
}

impl From<&DrainReport> for SessionSummary {
    fn from(report: &DrainReport) -> Self {
        Self {
            total_processed: report.total_processed,
            total_successful: report.total_successful,
            total_failed: report.total_failed,
            total_skipped: report.total_skipped,
            batches_completed: report.attempts(),
            batches_failed: report.batches_failed,
            processing_time_ms: report.elapsed_ms,
            stop_reason: report.stop_reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
    pub results: Vec<ProcessingResult>,
}

impl SessionOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            session_id: None,
            summary: None,
            results: Vec::new(),
        }
    }

    /// `Ok(self)` for a successful session, otherwise the matching error.
    ///
    /// Rejected sessions (disabled, already processing) have no session id
    /// and map to [`AicwError::WorkerState`].
    ///
    /// # Errors
    ///
    /// Returns an error when `success` is false.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        match self.session_id {
            Some(session_id) => Err(AicwError::WorkerSession {
                session_id,
                message: self.message,
            }),
            None => Err(AicwError::WorkerState(self.message)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessStatus {
    pub is_processing: bool,
    pub enabled: bool,
    pub last_session_at: Option<DateTime<Utc>>,
    pub queue: QueueMetrics,
    pub health: WorkerHealth,
    pub estimated_completion_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessMetrics {
    pub sessions: u64,
    pub total_processed: u64,
    pub total_errors: u64,
    pub success_rate: f64,
    pub last_session_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Totals {
    sessions: u64,
    processed: u64,
    errors: u64,
    last_session_at: Option<DateTime<Utc>>,
}

/// Serverless worker handle. Cheap to clone.
#[derive(Clone)]
pub struct ServerlessWorker {
    queue: Arc<dyn QueueStore>,
    sinks: Sinks,
    config: Arc<RwLock<ServerlessConfig>>,
    is_processing: Arc<AtomicBool>,
    session_cancel: Arc<Mutex<Option<CancellationToken>>>,
    totals: Arc<Mutex<Totals>>,
}

impl std::fmt::Debug for ServerlessWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerlessWorker")
            .field("config", &self.config())
            .field("is_processing", &self.is_processing.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Clears the processing flag however the session ends.
struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
    cancel: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.flag.store(false, Ordering::Release);
    }
}

impl ServerlessWorker {
    #[must_use]
    pub fn new(queue: Arc<dyn QueueStore>, sinks: Sinks, config: ServerlessConfig) -> Self {
        Self {
            queue,
            sinks,
            config: Arc::new(RwLock::new(config)),
            is_processing: Arc::new(AtomicBool::new(false)),
            session_cancel: Arc::new(Mutex::new(None)),
            totals: Arc::new(Mutex::new(Totals::default())),
        }
    }

    #[must_use]
    pub fn config(&self) -> ServerlessConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn totals(&self) -> MutexGuard<'_, Totals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }

    /// Run one processing session.
    ///
    /// Never returns an error: failures are reported in the outcome with
    /// `success: false`.
    pub async fn run(&self) -> SessionOutcome {
        let config = self.config();
        if !config.enabled {
            return SessionOutcome::rejected("AI worker is disabled in configuration");
        }
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("session rejected; already processing");
            return SessionOutcome::rejected("AI worker is already processing");
        }

        let cancel = CancellationToken::new();
        *self.session_cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        let _guard = ProcessingGuard {
            flag: &self.is_processing,
            cancel: &self.session_cancel,
        };

        let session_id = new_session_id();
        tracing::info!(
            session_id = %session_id,
            budget_secs = config.max_processing_time.as_secs(),
            "starting processing session"
        );
        self.sinks
            .log_event(
                WorkerEvent::new(
                    WorkerEventKind::WorkerSessionStart,
                    EventStatus::Info,
                    format!("Starting AI processing session {session_id}"),
                )
                .with_details(serde_json::json!({
                    "sessionId": session_id,
                    "maxProcessingTimeMs": millis(config.max_processing_time),
                })),
            )
            .await;

        let budget = DrainBudget::for_duration(
            config.max_processing_time,
            config.inter_batch_pause,
            config.pause_guard,
        );
        let observer = SessionObserver {
            sinks: &self.sinks,
            config,
        };
        let result = drain(self.queue.as_ref(), &budget, &cancel, &observer).await;

        {
            let mut totals = self.totals();
            totals.sessions += 1;
            totals.last_session_at = Some(Utc::now());
            if let Ok(report) = &result {
                totals.processed += report.total_successful as u64;
                totals.errors += report.total_failed as u64;
            }
        }

        match result {
            Ok(report) => self.session_completed(session_id, report).await,
            Err(e) => self.session_failed(session_id, &e).await,
        }
    }

    async fn session_completed(&self, session_id: String, report: DrainReport) -> SessionOutcome {
        let summary = SessionSummary::from(&report);
        let message = format!(
            "Processing completed: {} successful, {} failed in {} batches",
            summary.total_successful, summary.total_failed, summary.batches_completed
        );
        tracing::info!(
            session_id = %session_id,
            processed = summary.total_processed,
            batches = summary.batches_completed,
            stop_reason = summary.stop_reason.as_str(),
            elapsed_ms = summary.processing_time_ms,
            "session completed"
        );
        self.sinks
            .log_event(
                WorkerEvent::new(
                    WorkerEventKind::WorkerSessionComplete,
                    EventStatus::Success,
                    message.clone(),
                )
                .with_details(serde_json::json!({
                    "sessionId": session_id,
                    "summary": summary,
                    "processingTimeMs": summary.processing_time_ms,
                })),
            )
            .await;

        SessionOutcome {
            success: true,
            message,
            session_id: Some(session_id),
            summary: Some(summary),
            results: report.results,
        }
    }

    async fn session_failed(&self, session_id: String, error: &AicwError) -> SessionOutcome {
        tracing::error!(session_id = %session_id, error = %error, "session failed");
        self.sinks
            .log_event(
                WorkerEvent::new(
                    WorkerEventKind::WorkerSessionError,
                    EventStatus::Error,
                    format!("Processing session failed: {error}"),
                )
                .with_details(serde_json::json!({
                    "sessionId": session_id,
                    "error": error.to_string(),
                })),
            )
            .await;

        SessionOutcome {
            success: false,
            message: format!("Processing failed: {error}"),
            session_id: Some(session_id),
            summary: None,
            results: Vec::new(),
        }
    }

    /// Ask the active session to stop after its in-flight items.
    ///
    /// Returns `false` when no session is active. The processing flag stays
    /// set until the session's `run` call returns.
    pub async fn force_stop(&self) -> bool {
        let token = self
            .session_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(token) = token else {
            tracing::debug!("force stop ignored; no active session");
            return false;
        };
        token.cancel();
        tracing::warn!("processing session force-stopped");
        self.sinks
            .log_event(WorkerEvent::new(
                WorkerEventKind::WorkerForceStop,
                EventStatus::Warning,
                "AI processing session force-stopped",
            ))
            .await;
        true
    }

    /// # Errors
    ///
    /// Returns an error if queue metrics cannot be read.
    pub async fn status(&self) -> Result<ServerlessStatus> {
        let queue = self.queue.metrics().await?;
        let (successes, errors, last_session_at) = {
            let totals = self.totals();
            (totals.processed, totals.errors, totals.last_session_at)
        };
        let assessment = health::assess(&HealthInputs {
            pending: queue.pending,
            successes,
            errors,
            idle: None,
            processing_interval: self.config().max_processing_time,
            backlog_warning: SERVERLESS_BACKLOG_WARNING,
        });
        let estimated_completion_ms = (queue.pending > 0).then(|| {
            millis(ESTIMATED_ITEM_TIME).saturating_mul(queue.pending as u64)
        });

        Ok(ServerlessStatus {
            is_processing: self.is_processing(),
            enabled: self.config().enabled,
            last_session_at,
            queue,
            health: assessment.health,
            estimated_completion_ms,
        })
    }

    #[must_use]
    pub fn metrics(&self) -> ServerlessMetrics {
        let totals = self.totals();
        ServerlessMetrics {
            sessions: totals.sessions,
            total_processed: totals.processed,
            total_errors: totals.errors,
            success_rate: 1.0 - health::error_rate(totals.processed, totals.errors),
            last_session_at: totals.last_session_at,
        }
    }

    /// Whether a session could start now: enabled, idle, and work pending.
    ///
    /// # Errors
    ///
    /// Returns an error if queue metrics cannot be read.
    pub async fn can_start_processing(&self) -> Result<bool> {
        if !self.config().enabled || self.is_processing() {
            return Ok(false);
        }
        Ok(self.queue.metrics().await?.pending > 0)
    }

    pub fn update_config(&self, update: ServerlessConfigUpdate) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let old = *config;
        *config = ServerlessConfig {
            enabled: update.enabled.unwrap_or(old.enabled),
            batch_size: update.batch_size.unwrap_or(old.batch_size).max(1),
            max_processing_time: update.max_processing_time.unwrap_or(old.max_processing_time),
            inter_batch_pause: update.inter_batch_pause.unwrap_or(old.inter_batch_pause),
            pause_guard: update.pause_guard.unwrap_or(old.pause_guard),
        };
        tracing::info!(old = ?old, new = ?*config, "serverless config updated");
    }
}

struct SessionObserver<'a> {
    sinks: &'a Sinks,
    config: ServerlessConfig,
}

#[async_trait]
impl DrainObserver for SessionObserver<'_> {
    async fn batch_completed(&self, batch: usize, pending_before: usize, result: &ProcessingResult) {
        let status = if result.failed > 0 {
            EventStatus::Warning
        } else {
            EventStatus::Success
        };
        tracing::info!(
            batch,
            successful = result.successful,
            failed = result.failed,
            "session batch completed"
        );
        self.sinks
            .log_event(
                WorkerEvent::new(
                    WorkerEventKind::WorkerBatchComplete,
                    status,
                    format!(
                        "Batch {batch}: {} successful, {} failed",
                        result.successful, result.failed
                    ),
                )
                .with_details(serde_json::json!({
                    "batch": batch,
                    "result": result,
                    "processingTimeMs": result.processing_time_ms,
                })),
            )
            .await;

        let worker_status = health::after_batch(WorkerHealth::Healthy, result);
        #[allow(clippy::cast_precision_loss)]
        let throughput = (result.processing_time_ms > 0)
            .then(|| result.processed as f64 / (result.processing_time_ms as f64 / 1000.0));
        self.sinks
            .record_metrics(&MetricsSnapshot {
                timestamp: Utc::now(),
                batch_size: self.config.batch_size,
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
            })
            .await;
    }

    async fn batch_failed(&self, batch: usize, error: &AicwError) {
        self.sinks
            .log_event(
                WorkerEvent::new(
                    WorkerEventKind::WorkerBatchError,
                    EventStatus::Error,
                    format!("Batch {batch} failed: {error}"),
                )
                .with_details(serde_json::json!({ "batch": batch, "error": error.to_string() })),
            )
            .await;
    }
}

fn new_session_id() -> String {
    format!(
        "session_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
