//! Analytics and audit sinks.
//!
//! Workers report through [`Sinks`]. Delivery is best effort: a failing
//! sink is logged and otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One worker cycle's numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub batch_size: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub processing_time_ms: u64,
    /// Pending items after the cycle.
    pub queue_depth: usize,
    pub worker_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Items per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    /// Resident set size in bytes, where the platform exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
}

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEventKind {
    WorkerStart,
    WorkerStop,
    WorkerBatchComplete,
    WorkerBatchError,
    WorkerHealthCheck,
    WorkerSessionStart,
    WorkerSessionComplete,
    WorkerSessionError,
    WorkerForceStop,
}

impl WorkerEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkerStart => "WORKER_START",
            Self::WorkerStop => "WORKER_STOP",
            Self::WorkerBatchComplete => "WORKER_BATCH_COMPLETE",
            Self::WorkerBatchError => "WORKER_BATCH_ERROR",
            Self::WorkerHealthCheck => "WORKER_HEALTH_CHECK",
            Self::WorkerSessionStart => "WORKER_SESSION_START",
            Self::WorkerSessionComplete => "WORKER_SESSION_COMPLETE",
            Self::WorkerSessionError => "WORKER_SESSION_ERROR",
            Self::WorkerForceStop => "WORKER_FORCE_STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Success,
    Info,
    Warning,
    Error,
}

impl EventStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEvent {
    pub kind: WorkerEventKind,
    pub status: EventStatus,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl WorkerEvent {
    #[must_use]
    pub fn new(kind: WorkerEventKind, status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record_metrics(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn log_event(&self, event: &WorkerEvent) -> Result<()>;
}

/// Writes both streams to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl AnalyticsSink for TracingSink {
    async fn record_metrics(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        tracing::info!(
            processed = snapshot.processed_count,
            successful = snapshot.success_count,
            failed = snapshot.error_count,
            queue_depth = snapshot.queue_depth,
            processing_time_ms = snapshot.processing_time_ms,
            worker_status = %snapshot.worker_status,
            "worker metrics"
        );
        Ok(())
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn log_event(&self, event: &WorkerEvent) -> Result<()> {
        match event.status {
            EventStatus::Error => tracing::error!(kind = event.kind.as_str(), details = %event.details, "{}", event.message),
            EventStatus::Warning => tracing::warn!(kind = event.kind.as_str(), details = %event.details, "{}", event.message),
            EventStatus::Success | EventStatus::Info => {
                tracing::info!(kind = event.kind.as_str(), details = %event.details, "{}", event.message);
            }
        }
        Ok(())
    }
}

/// The pair of sinks a worker reports to.
#[derive(Clone)]
pub struct Sinks {
    analytics: Arc<dyn AnalyticsSink>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks").finish_non_exhaustive()
    }
}

impl Default for Sinks {
    fn default() -> Self {
        Self::tracing()
    }
}

impl Sinks {
    #[must_use]
    pub fn new(analytics: Arc<dyn AnalyticsSink>, events: Arc<dyn EventSink>) -> Self {
        Self { analytics, events }
    }

    /// Both streams to `tracing` only.
    #[must_use]
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink), Arc::new(TracingSink))
    }

    pub async fn record_metrics(&self, snapshot: &MetricsSnapshot) {
        if let Err(e) = self.analytics.record_metrics(snapshot).await {
            tracing::warn!(error = %e, "analytics sink failed");
        }
    }

    pub async fn log_event(&self, event: WorkerEvent) {
        if let Err(e) = self.events.log_event(&event).await {
            tracing::warn!(error = %e, kind = event.kind.as_str(), "event sink failed");
        }
    }
}
