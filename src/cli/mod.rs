//! CLI argument parsing and command dispatch.
//!
//! Each command module exposes an `execute` function; the helpers here build
//! the shared runtime pieces (registry, classifiers, sinks) from the resolved
//! configuration.

pub mod args;
pub mod batch;
pub mod classify;
pub mod drain;
pub mod events;
pub mod providers;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::core::batch::BatchClassifier;
use crate::core::classifier::Classifier;
use crate::core::registry::ProviderRegistry;
use crate::core::sinks::Sinks;
use crate::error::Result;
use crate::providers::HttpTransport;
use crate::storage::config::ResolvedConfig;
use crate::storage::events::SqliteEventLog;
use crate::storage::paths::AppPaths;
use crate::storage::providers::ProviderStore;

pub use args::{Cli, Commands, OutputFormat};

/// Open the provider registry backed by the configured store.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built or the store is unreadable.
pub fn open_registry(resolved: &ResolvedConfig) -> Result<Arc<ProviderRegistry>> {
    let paths = AppPaths::new();
    let store = ProviderStore::new(resolved.providers_file(&paths));
    let registry = ProviderRegistry::with_store(
        Arc::new(HttpTransport::new()?),
        resolved.config.classifier.registry_options(),
        store,
    )?;
    Ok(Arc::new(registry))
}

/// Open the registry and seed it from vendor keys when it is empty.
///
/// # Errors
///
/// Returns an error if the registry cannot be opened or persisted.
pub fn open_seeded_registry(resolved: &ResolvedConfig) -> Result<Arc<ProviderRegistry>> {
    let registry = open_registry(resolved)?;
    if registry.is_empty() {
        let added = registry.initialize_default_providers()?;
        tracing::info!(added, "seeded providers from environment");
    }
    Ok(registry)
}

#[must_use]
pub fn build_classifier(resolved: &ResolvedConfig, registry: &Arc<ProviderRegistry>) -> Classifier {
    Classifier::new(Arc::clone(registry)).with_max_attempts(resolved.config.classifier.max_attempts)
}

#[must_use]
pub fn build_batch_classifier(
    resolved: &ResolvedConfig,
    registry: &Arc<ProviderRegistry>,
) -> Arc<BatchClassifier> {
    Arc::new(BatchClassifier::new(
        Arc::new(build_classifier(resolved, registry)),
        resolved.config.batch.options(),
    ))
}

/// Worker sinks: the SQLite event log, or tracing only when disabled.
///
/// # Errors
///
/// Returns an error if the event log cannot be opened.
pub fn build_sinks(resolved: &ResolvedConfig, no_event_log: bool) -> Result<Sinks> {
    if no_event_log {
        return Ok(Sinks::tracing());
    }
    let path = resolved.events_db_file(&AppPaths::new());
    let log = Arc::new(SqliteEventLog::open(&path)?);
    tracing::debug!(path = %path.display(), "event log opened");
    Ok(Sinks::new(log.clone(), log))
}

/// Write `value` to `path` as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    tracing::info!(path = %path.display(), "results written");
    Ok(())
}
