//! Events command implementation.

use serde::Serialize;

use crate::cli::args::EventsArgs;
use crate::core::sinks::{MetricsSnapshot, WorkerEvent};
use crate::error::Result;
use crate::render::{self, human};
use crate::storage::config::ResolvedConfig;
use crate::storage::events::SqliteEventLog;
use crate::storage::paths::AppPaths;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<WorkerEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshots: Option<Vec<MetricsSnapshot>>,
}

/// Execute the events command.
///
/// # Errors
///
/// Returns an error if the event log cannot be opened or queried.
pub fn execute(args: &EventsArgs, resolved: &ResolvedConfig) -> Result<()> {
    let log = SqliteEventLog::open(&resolved.events_db_file(&AppPaths::new()))?;
    let report = collect(&log, args)?;

    let output = render::render(
        "events",
        &report,
        Vec::new(),
        resolved.format,
        resolved.pretty,
        render_human,
    )?;
    println!("{}", output.trim_end());
    Ok(())
}

fn collect(log: &SqliteEventLog, args: &EventsArgs) -> Result<EventsReport> {
    let removed = args
        .cleanup
        .map(|days| log.cleanup_older_than(days))
        .transpose()?;
    let mut report = EventsReport {
        removed,
        events: None,
        snapshots: None,
    };
    if args.snapshots {
        report.snapshots = Some(log.recent_snapshots(args.limit)?);
    } else {
        report.events = Some(log.recent_events(args.limit)?);
    }
    Ok(report)
}

fn render_human(report: &EventsReport) -> String {
    let mut out = String::new();
    if let Some(removed) = report.removed {
        out.push_str(&format!("Removed {removed} old entries.\n"));
    }
    if let Some(events) = &report.events {
        out.push_str(&human::render_events(events));
    }
    if let Some(snapshots) = &report.snapshots {
        out.push_str(&human::render_snapshots(snapshots));
    }
    out
}
