//! Drain command implementation: one serverless processing session.

use std::sync::Arc;
use std::time::Duration;

use crate::cli::args::DrainArgs;
use crate::cli::{build_batch_classifier, build_sinks, open_seeded_registry, write_json_file};
use crate::core::worker::{ServerlessConfig, ServerlessWorker};
use crate::error::{AicwError, Result};
use crate::render::{self, human};
use crate::storage::config::{MAX_SERVERLESS_SECS, ResolvedConfig};
use crate::storage::queue::MemoryQueue;

/// Execute the drain command.
///
/// Ctrl-C force-stops the session; it still reports what it finished.
///
/// # Errors
///
/// Returns an error if setup fails, the worker is disabled, or the session fails.
pub async fn execute(args: &DrainArgs, resolved: &ResolvedConfig) -> Result<()> {
    let config = session_config(args, resolved)?;
    let registry = open_seeded_registry(resolved)?;
    let queue = Arc::new(MemoryQueue::from_file(
        &args.queue,
        build_batch_classifier(resolved, &registry),
    )?);
    let sinks = build_sinks(resolved, args.no_event_log)?;
    let worker = ServerlessWorker::new(queue.clone(), sinks, config);

    let interrupt = tokio::spawn({
        let worker = worker.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping session");
                worker.force_stop().await;
            }
        }
    });
    let outcome = worker.run().await;
    interrupt.abort();
    registry.flush_if_dirty()?;

    let outcome = outcome.into_result()?;
    if let Some(path) = &args.output {
        write_json_file(path, &queue.results())?;
    }

    let output = render::render(
        "drain",
        &outcome,
        Vec::new(),
        resolved.format,
        resolved.pretty,
        human::render_session,
    )?;
    println!("{}", output.trim_end());
    Ok(())
}

fn session_config(args: &DrainArgs, resolved: &ResolvedConfig) -> Result<ServerlessConfig> {
    let mut config = resolved
        .config
        .serverless
        .serverless_config(resolved.config.batch.batch_size);
    if let Some(secs) = args.budget {
        if secs == 0 || secs > MAX_SERVERLESS_SECS {
            return Err(AicwError::ConfigInvalid {
                key: "--budget".to_string(),
                value: secs.to_string(),
                message: format!("must be between 1 and {MAX_SERVERLESS_SECS} seconds"),
            });
        }
        config.max_processing_time = Duration::from_secs(secs);
    }
    Ok(config)
}
