//! `SQLite` audit log and metrics store.
//!
//! Implements both worker sinks. Writes run on the blocking pool so a slow
//! disk never stalls the runtime.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use crate::core::sinks::{
    AnalyticsSink, EventStatus, EventSink, MetricsSnapshot, WorkerEvent, WorkerEventKind,
};
use crate::error::{AicwError, Result};
use crate::storage::schema::{cleanup_older_than, run_migrations};

/// Event log database.
#[derive(Clone)]
pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEventLog").finish_non_exhaustive()
    }
}

impl SqliteEventLog {
    /// Create or open the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the database
    /// cannot be opened, or migrations fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)
            .map_err(|e| AicwError::Storage(format!("open event log: {e}")))?;
        run_migrations(&mut conn)?;

        Ok(Self::from_connection(conn))
    }

    /// In-memory database, for tests.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| AicwError::Storage(format!("open in-memory event log: {e}")))?;
        run_migrations(&mut conn)?;

        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one event. Returns its row id.
    ///
    /// # Errors
    /// Returns an error if the INSERT fails.
    pub fn record_event(&self, event: &WorkerEvent) -> Result<i64> {
        let conn = self.lock();
        let processing_time = event
            .details
            .get("processingTimeMs")
            .and_then(serde_json::Value::as_i64);

        conn.prepare_cached(
            "INSERT INTO processing_log (type, status, message, details, processing_time_ms, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(|e| AicwError::Storage(format!("prepare event insert: {e}")))?
        .execute(params![
            event.kind.as_str(),
            event.status.as_str(),
            event.message,
            event.details.to_string(),
            processing_time,
            event.timestamp.to_rfc3339(),
        ])
        .map_err(|e| AicwError::Storage(format!("insert event: {e}")))?;

        Ok(conn.last_insert_rowid())
    }

    /// Append one metrics snapshot. Returns its row id.
    ///
    /// # Errors
    /// Returns an error if the INSERT fails.
    pub fn record_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<i64> {
        let conn = self.lock();
        conn.prepare_cached(
            "INSERT INTO metrics_snapshots ( \
                timestamp, batch_size, processed_count, success_count, error_count, \
                processing_time_ms, queue_depth, worker_status, provider_id, \
                throughput, average_latency_ms, error_rate, memory_usage \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .map_err(|e| AicwError::Storage(format!("prepare snapshot insert: {e}")))?
        .execute(params![
            snapshot.timestamp.to_rfc3339(),
            to_sql_int(snapshot.batch_size),
            to_sql_int(snapshot.processed_count),
            to_sql_int(snapshot.success_count),
            to_sql_int(snapshot.error_count),
            i64::try_from(snapshot.processing_time_ms).unwrap_or(i64::MAX),
            to_sql_int(snapshot.queue_depth),
            snapshot.worker_status,
            snapshot.provider_id,
            snapshot.throughput,
            snapshot.average_latency_ms,
            snapshot.error_rate,
            snapshot
                .memory_usage
                .map(|bytes| i64::try_from(bytes).unwrap_or(i64::MAX)),
        ])
        .map_err(|e| AicwError::Storage(format!("insert snapshot: {e}")))?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent events first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<WorkerEvent>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT type, status, message, details, created_at FROM processing_log \
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .map_err(|e| AicwError::Storage(format!("prepare event query: {e}")))?;

        let rows = stmt
            .query_map([to_sql_int(limit)], map_event_row)
            .map_err(|e| AicwError::Storage(format!("query events: {e}")))?;

        let mut events = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| AicwError::Storage(format!("read event row: {e}")))?;
            events.push(raw.decode()?);
        }
        Ok(events)
    }

    /// Most recent snapshots first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn recent_snapshots(&self, limit: usize) -> Result<Vec<MetricsSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT timestamp, batch_size, processed_count, success_count, error_count, \
                        processing_time_ms, queue_depth, worker_status, provider_id, \
                        throughput, average_latency_ms, error_rate, memory_usage \
                 FROM metrics_snapshots ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .map_err(|e| AicwError::Storage(format!("prepare snapshot query: {e}")))?;

        let rows = stmt
            .query_map([to_sql_int(limit)], map_snapshot_row)
            .map_err(|e| AicwError::Storage(format!("query snapshots: {e}")))?;

        rows.map(|row| row.map_err(|e| AicwError::Storage(format!("read snapshot row: {e}"))))
            .collect()
    }

    /// Retention cleanup over both tables.
    ///
    /// # Errors
    /// Returns an error if `days` is non-positive or the DELETE fails.
    pub fn cleanup_older_than(&self, days: i64) -> Result<usize> {
        let deleted = cleanup_older_than(&self.lock(), days)?;
        tracing::info!(deleted, days, "event log cleanup");
        Ok(deleted)
    }
}

#[async_trait]
impl EventSink for SqliteEventLog {
    async fn log_event(&self, event: &WorkerEvent) -> Result<()> {
        let log = self.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || log.record_event(&event))
            .await
            .map_err(|e| AicwError::Storage(format!("event write task: {e}")))??;
        Ok(())
    }
}

#[async_trait]
impl AnalyticsSink for SqliteEventLog {
    async fn record_metrics(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let log = self.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || log.record_snapshot(&snapshot))
            .await
            .map_err(|e| AicwError::Storage(format!("snapshot write task: {e}")))??;
        Ok(())
    }
}

struct RawEvent {
    kind: String,
    status: String,
    message: String,
    details: String,
    created_at: String,
}

impl RawEvent {
    fn decode(self) -> Result<WorkerEvent> {
        let kind: WorkerEventKind = serde_json::from_value(serde_json::Value::String(self.kind))?;
        let status: EventStatus = serde_json::from_value(serde_json::Value::String(self.status))?;
        Ok(WorkerEvent {
            kind,
            status,
            message: self.message,
            details: serde_json::from_str(&self.details).unwrap_or(serde_json::Value::Null),
            timestamp: parse_timestamp(&self.created_at)?,
        })
    }
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        kind: row.get(0)?,
        status: row.get(1)?,
        message: row.get(2)?,
        details: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_snapshot_row(row: &Row<'_>) -> rusqlite::Result<MetricsSnapshot> {
    let timestamp: String = row.get(0)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let memory: Option<i64> = row.get(12)?;

    Ok(MetricsSnapshot {
        timestamp,
        batch_size: from_sql_int(row.get(1)?),
        processed_count: from_sql_int(row.get(2)?),
        success_count: from_sql_int(row.get(3)?),
        error_count: from_sql_int(row.get(4)?),
        processing_time_ms: u64::try_from(row.get::<_, i64>(5)?).unwrap_or(0),
        queue_depth: from_sql_int(row.get(6)?),
        worker_status: row.get(7)?,
        provider_id: row.get(8)?,
        throughput: row.get(9)?,
        average_latency_ms: row.get(10)?,
        error_rate: row.get(11)?,
        memory_usage: memory.and_then(|bytes| u64::try_from(bytes).ok()),
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AicwError::Storage(format!("invalid timestamp {value:?}: {e}")))
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(at: DateTime<Utc>) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: at,
            batch_size: 5,
            processed_count: 5,
            success_count: 4,
            error_count: 1,
            processing_time_ms: 1500,
            queue_depth: 20,
            worker_status: "healthy".to_string(),
            provider_id: None,
            throughput: Some(3.3),
            average_latency_ms: None,
            error_rate: Some(0.2),
            memory_usage: Some(64 * 1024 * 1024),
        }
    }

    #[test]
    fn events_round_trip_newest_first() {
        let log = SqliteEventLog::open_in_memory().unwrap();
        let mut first = WorkerEvent::new(WorkerEventKind::WorkerStart, EventStatus::Success, "started");
        first.timestamp = Utc::now() - Duration::seconds(10);
        let second = WorkerEvent::new(
            WorkerEventKind::WorkerBatchComplete,
            EventStatus::Warning,
            "Processed batch: 4 successful, 1 failed",
        )
        .with_details(serde_json::json!({"processingTimeMs": 1200}));

        log.record_event(&first).unwrap();
        log.record_event(&second).unwrap();

        let events = log.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, WorkerEventKind::WorkerBatchComplete);
        assert_eq!(events[0].details["processingTimeMs"], 1200);
        assert_eq!(events[1].kind, WorkerEventKind::WorkerStart);

        assert_eq!(log.recent_events(1).unwrap().len(), 1);
    }

    #[test]
    fn snapshots_round_trip() {
        let log = SqliteEventLog::open_in_memory().unwrap();
        let original = snapshot(Utc::now());
        log.record_snapshot(&original).unwrap();

        let stored = log.recent_snapshots(5).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].queue_depth, 20);
        assert_eq!(stored[0].memory_usage, original.memory_usage);
        assert_eq!(stored[0].error_rate, Some(0.2));
    }

    #[test]
    fn cleanup_drops_expired_rows() {
        let log = SqliteEventLog::open_in_memory().unwrap();
        let mut old = WorkerEvent::new(WorkerEventKind::WorkerStop, EventStatus::Success, "old");
        old.timestamp = Utc::now() - Duration::days(45);
        log.record_event(&old).unwrap();
        log.record_snapshot(&snapshot(Utc::now() - Duration::days(45))).unwrap();
        log.record_event(&WorkerEvent::new(WorkerEventKind::WorkerStart, EventStatus::Success, "new"))
            .unwrap();

        assert_eq!(log.cleanup_older_than(30).unwrap(), 2);
        assert_eq!(log.recent_events(10).unwrap().len(), 1);
        assert!(log.recent_snapshots(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_traits_write_through() {
        let log = SqliteEventLog::open_in_memory().unwrap();
        EventSink::log_event(
            &log,
            &WorkerEvent::new(WorkerEventKind::WorkerSessionStart, EventStatus::Success, "go"),
        )
        .await
        .unwrap();
        AnalyticsSink::record_metrics(&log, &snapshot(Utc::now()))
            .await
            .unwrap();

        assert_eq!(log.recent_events(5).unwrap().len(), 1);
        assert_eq!(log.recent_snapshots(5).unwrap().len(), 1);
    }

    #[test]
    fn opens_file_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/events.db");
        let log = SqliteEventLog::open(&path).unwrap();
        log.record_event(&WorkerEvent::new(WorkerEventKind::WorkerStart, EventStatus::Info, "x"))
            .unwrap();
        drop(log);

        let reopened = SqliteEventLog::open(&path).unwrap();
        assert_eq!(reopened.recent_events(5).unwrap().len(), 1);
    }
}
