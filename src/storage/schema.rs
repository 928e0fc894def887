//! Event log schema and migrations.
//!
//! Migrations are plain SQL files applied in version order inside a
//! transaction each; applied versions are recorded in `schema_migrations`.

use chrono::{Duration, Utc};
use rusqlite::Connection;

use crate::error::{AicwError, Result};

const EVENT_LOG_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("../../migrations/001_processing_log.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("../../migrations/002_metrics_snapshots.sql"),
    },
];

/// Default retention for events and snapshots.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Bring the schema up to date. Returns the latest version applied.
///
/// # Errors
/// Returns an error if reading the schema version or applying a migration fails.
pub fn run_migrations(conn: &mut Connection) -> Result<i32> {
    ensure_schema_migrations_table(conn)?;

    let mut current_version = get_schema_version(conn)?;

    for migration in EVENT_LOG_MIGRATIONS {
        if migration.version > current_version {
            apply_migration(conn, migration)?;
            current_version = migration.version;
        }
    }

    Ok(current_version)
}

/// Delete events and snapshots older than `retention_days`.
///
/// Returns the number of rows deleted across both tables.
///
/// # Errors
/// Returns an error if `retention_days` is non-positive or a DELETE fails.
pub fn cleanup_older_than(conn: &Connection, retention_days: i64) -> Result<usize> {
    if retention_days <= 0 {
        return Err(AicwError::Config(
            "Retention days must be greater than 0".to_string(),
        ));
    }

    let cutoff = (Utc::now() - Duration::days(retention_days)).to_rfc3339();

    let events = conn
        .execute("DELETE FROM processing_log WHERE created_at < ?1", [&cutoff])
        .map_err(|e| AicwError::Storage(format!("cleanup processing_log: {e}")))?;
    let snapshots = conn
        .execute("DELETE FROM metrics_snapshots WHERE timestamp < ?1", [&cutoff])
        .map_err(|e| AicwError::Storage(format!("cleanup metrics_snapshots: {e}")))?;

    let deleted = events + snapshots;
    if deleted > 0 {
        conn.execute_batch("VACUUM")
            .map_err(|e| AicwError::Storage(format!("vacuum failed: {e}")))?;
    }

    Ok(deleted)
}

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: i32,
    sql: &'static str,
}

fn ensure_schema_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY,\
            applied_at TEXT DEFAULT (datetime('now'))\
        );",
    )
    .map_err(|e| AicwError::Storage(format!("create schema_migrations: {e}")))?;

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .map_err(|e| AicwError::Storage(format!("read schema version: {e}")))?;

    Ok(version.unwrap_or(0))
}

fn apply_migration(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| AicwError::Storage(format!("begin migration: {e}")))?;

    tx.execute_batch(migration.sql).map_err(|e| {
        AicwError::Storage(format!("apply migration {}: {e}", migration.version))
    })?;

    tx.execute(
        "INSERT INTO schema_migrations (version) VALUES (?1)",
        [migration.version],
    )
    .map_err(|e| AicwError::Storage(format!("record migration {}: {e}", migration.version)))?;

    tx.commit()
        .map_err(|e| AicwError::Storage(format!("commit migration {}: {e}", migration.version)))?;

    tracing::debug!(version = migration.version, "applied event log migration");
    Ok(())
}
