//! Batch command implementation.

use tokio_util::sync::CancellationToken;

use crate::cli::args::BatchArgs;
use crate::cli::{build_batch_classifier, open_seeded_registry, write_json_file};
use crate::core::batch::BatchOptionsUpdate;
use crate::error::Result;
use crate::render::{self, human};
use crate::storage::config::ResolvedConfig;
use crate::storage::queue::load_articles;

/// Execute the batch command.
///
/// Ctrl-C cancels the run; items not yet dispatched are reported as skipped.
///
/// # Errors
///
/// Returns an error if the article file or registry cannot be read, or the
/// output file cannot be written.
pub async fn execute(args: &BatchArgs, resolved: &ResolvedConfig) -> Result<()> {
    let articles = load_articles(&args.file)?;
    let registry = open_seeded_registry(resolved)?;
    let batch = build_batch_classifier(resolved, &registry);
    batch.update_options(overrides(args));

    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt(cancel.clone());

    tracing::info!(count = articles.len(), file = %args.file.display(), "batch started");
    let outcome = batch.classify_batch(&articles, &cancel).await;
    interrupt.abort();
    registry.flush_if_dirty()?;

    if let Some(path) = &args.output {
        write_json_file(path, &outcome)?;
    }

    let errors = outcome
        .errors
        .iter()
        .map(|(id, message)| format!("{id}: {message}"))
        .collect();
    let output = render::render(
        "batch",
        &outcome,
        errors,
        resolved.format,
        resolved.pretty,
        human::render_batch,
    )?;
    println!("{}", output.trim_end());
    Ok(())
}

fn overrides(args: &BatchArgs) -> BatchOptionsUpdate {
    BatchOptionsUpdate {
        batch_size: args.batch_size,
        max_concurrent_requests: args.concurrency,
        enable_batching: args.sequential.then_some(false),
        ..BatchOptionsUpdate::default()
    }
}

/// Cancel `token` on Ctrl-C.
pub(crate) fn spawn_interrupt(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            token.cancel();
        }
    })
}
