//! Human-readable output.
//!
//! Plain text with fixed-width columns; everything here is pure string
//! building so the renderers are easy to test.

use std::fmt::Write as _;

use crate::core::batch::BatchOutcome;
use crate::core::classifier::Attempt;
use crate::core::health::HealthRecord;
use crate::core::models::ClassificationResult;
use crate::core::provider::Provider;
use crate::core::sinks::{MetricsSnapshot, WorkerEvent};
use crate::core::worker::{SessionOutcome, WorkerMetrics, WorkerStatus};

/// Render one classification.
#[must_use]
pub fn render_classification(
    article_id: &str,
    result: &ClassificationResult,
    provider_id: Option<&str>,
    attempts: &[Attempt],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Article {article_id}");
    let _ = writeln!(out, "  Location:        {}", result.location);
    let _ = writeln!(out, "  Discrimination:  {}", result.discrimination_type);
    let _ = writeln!(out, "  Severity:        {}", result.severity);
    let _ = writeln!(out, "  Confidence:      {:.2}", result.confidence_score);
    let _ = writeln!(
        out,
        "  Classified by:   {}",
        provider_id.unwrap_or("keyword fallback")
    );
    let _ = writeln!(out, "  Reasoning:       {}", result.reasoning);
    if !result.keywords.is_empty() {
        let _ = writeln!(out, "  Keywords:        {}", result.keywords.join(", "));
    }
    let entities = &result.entities;
    for (label, values) in [
        ("Locations", &entities.locations),
        ("People", &entities.people),
        ("Organizations", &entities.organizations),
    ] {
        if !values.is_empty() {
            let _ = writeln!(out, "  {:<17}{}", format!("{label}:"), values.join(", "));
        }
    }
    for attempt in attempts.iter().filter(|a| !a.success) {
        let _ = writeln!(
            out,
            "  ! {} failed after {}ms: {}",
            attempt.provider_id,
            attempt.latency_ms,
            attempt.error.as_deref().unwrap_or("unknown error")
        );
    }
    out
}

/// Render a batch outcome with one line per item.
#[must_use]
pub fn render_batch(outcome: &BatchOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Batch: {} successful, {} failed, {} skipped ({} via fallback) in {}ms",
        outcome.successful,
        outcome.failed,
        outcome.skipped.len(),
        outcome.fallback,
        outcome.processing_time_ms
    );
    if outcome.results.is_empty() && outcome.errors.is_empty() {
        return out;
    }
    let width = id_width(
        outcome
            .results
            .keys()
            .chain(outcome.errors.keys())
            .map(String::as_str),
    );
    for (id, result) in &outcome.results {
        let _ = writeln!(
            out,
            "  {id:<width$}  {:<8} {:<10} {:<7} {:.2}",
            result.location.as_str(),
            result.discrimination_type.as_str(),
            result.severity.as_str(),
            result.confidence_score
        );
    }
    for (id, error) in &outcome.errors {
        let _ = writeln!(out, "  {id:<width$}  error: {error}");
    }
    out
}

/// Render the provider list with usage.
#[must_use]
pub fn render_providers(providers: &[Provider]) -> String {
    if providers.is_empty() {
        return "No providers configured. Run `aicw providers init` or `aicw providers add`.\n"
            .to_string();
    }
    let width = id_width(providers.iter().map(|p| p.id.as_str()));
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:<9} {:<8} {:>8}  {:<24} {:>8} {:>8}  KEY",
        "ID", "TYPE", "STATE", "PRIORITY", "MODEL", "REQUESTS", "SUCCESS"
    );
    for provider in providers {
        let _ = writeln!(
            out,
            "{:<width$}  {:<9} {:<8} {:>8}  {:<24} {:>8} {:>7.0}%  {}",
            provider.id,
            provider.provider_type.cli_name(),
            if provider.enabled { "enabled" } else { "disabled" },
            provider.priority,
            provider.config.model,
            provider.usage.request_count,
            provider.usage.success_rate * 100.0,
            provider.config.api_key.describe()
        );
    }
    out
}

/// Render a single provider's settings.
#[must_use]
pub fn render_provider(provider: &Provider) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", provider.name, provider.id);
    let _ = writeln!(out, "  Type:        {}", provider.provider_type.display_name());
    let _ = writeln!(out, "  Enabled:     {}", provider.enabled);
    let _ = writeln!(out, "  Priority:    {}", provider.priority);
    let _ = writeln!(out, "  Model:       {}", provider.config.model);
    if let Some(url) = provider.base_url() {
        let _ = writeln!(out, "  Base URL:    {url}");
    }
    let _ = writeln!(out, "  API key:     {}", provider.config.api_key.describe());
    let _ = writeln!(out, "  Timeout:     {}ms", provider.config.timeout_ms);
    out
}

/// Render health probe results.
#[must_use]
pub fn render_health(records: &[HealthRecord]) -> String {
    if records.is_empty() {
        return "No enabled providers to check.\n".to_string();
    }
    let width = id_width(records.iter().map(|r| r.provider_id.as_str()));
    let mut out = String::new();
    for record in records {
        let _ = write!(
            out,
            "{:<width$}  {:<9} {:>6}ms  error rate {:.0}%",
            record.provider_id,
            record.status.as_str(),
            record.response_time_ms,
            record.error_rate * 100.0
        );
        if let Some(message) = &record.error_message {
            let _ = write!(out, "  ({message})");
        }
        out.push('\n');
    }
    out
}

/// Render a processing session outcome.
#[must_use]
pub fn render_session(outcome: &SessionOutcome) -> String {
    let mut out = String::new();
    let marker = if outcome.success { "ok" } else { "failed" };
    let _ = writeln!(out, "[{marker}] {}", outcome.message);
    if let Some(session_id) = &outcome.session_id {
        let _ = writeln!(out, "  Session:    {session_id}");
    }
    if let Some(summary) = &outcome.summary {
        let _ = writeln!(out, "  Processed:  {}", summary.total_processed);
        let _ = writeln!(out, "  Skipped:    {}", summary.total_skipped);
        let _ = writeln!(
            out,
            "  Batches:    {} ({} failed)",
            summary.batches_completed, summary.batches_failed
        );
        let _ = writeln!(out, "  Elapsed:    {}ms", summary.processing_time_ms);
        let _ = writeln!(out, "  Stopped:    {}", summary.stop_reason.as_str());
    }
    out
}

/// Render persistent worker status and lifetime metrics.
#[must_use]
pub fn render_worker_status(status: &WorkerStatus, metrics: &WorkerMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Worker {} ({})", status.state, status.health);
    let _ = writeln!(out, "  Processed:      {}", metrics.total_processed);
    let _ = writeln!(out, "  Errors:         {}", metrics.total_errors);
    let _ = writeln!(out, "  Batches:        {}", metrics.batches_completed);
    let _ = writeln!(out, "  Success rate:   {:.1}%", metrics.success_rate * 100.0);
    let _ = writeln!(
        out,
        "  Avg batch time: {:.0}ms",
        metrics.average_processing_time_ms
    );
    let _ = writeln!(out, "  Uptime:         {}s", status.uptime_ms / 1000);
    if let Some(at) = status.last_processed_at {
        let _ = writeln!(out, "  Last batch:     {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    out
}

/// Render event log entries, newest first.
#[must_use]
pub fn render_events(events: &[WorkerEvent]) -> String {
    if events.is_empty() {
        return "No events recorded.\n".to_string();
    }
    let mut out = String::new();
    for event in events {
        let _ = writeln!(
            out,
            "{}  {:<7} {:<23} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.status.as_str(),
            event.kind.as_str(),
            event.message
        );
    }
    out
}

/// Render metric snapshots, newest first.
#[must_use]
pub fn render_snapshots(snapshots: &[MetricsSnapshot]) -> String {
    if snapshots.is_empty() {
        return "No snapshots recorded.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<19}  {:>9} {:>7} {:>6} {:>8} {:>6}  STATUS",
        "TIME", "PROCESSED", "OK", "ERR", "MS", "QUEUE"
    );
    for snapshot in snapshots {
        let _ = writeln!(
            out,
            "{:<19}  {:>9} {:>7} {:>6} {:>8} {:>6}  {}",
            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
            snapshot.processed_count,
            snapshot.success_count,
            snapshot.error_count,
            snapshot.processing_time_ms,
            snapshot.queue_depth,
            snapshot.worker_status
        );
    }
    out
}

fn id_width<'a>(ids: impl Iterator<Item = &'a str>) -> usize {
    ids.map(str::len).max().unwrap_or(0).max(2)
}
