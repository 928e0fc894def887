//! Worker command implementation: the persistent worker in the foreground.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::args::WorkerArgs;
use crate::cli::{build_batch_classifier, build_sinks, open_seeded_registry, write_json_file};
use crate::core::queue::QueueStore;
use crate::core::worker::{PersistentWorker, WorkerConfig, WorkerMetrics, WorkerStatus};
use crate::error::{AicwError, Result};
use crate::render::{self, human};
use crate::storage::config::ResolvedConfig;
use crate::storage::queue::MemoryQueue;

/// How often `--exit-when-empty` looks at the queue.
const EMPTY_POLL: Duration = Duration::from_secs(1);

/// Final state reported when the worker exits.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub status: WorkerStatus,
    pub metrics: WorkerMetrics,
}

/// Execute the worker command.
///
/// With `auto_start` on, the worker runs on its timers until Ctrl-C, or until
/// the queue is drained with `--exit-when-empty`. With it off, one cycle runs
/// immediately and the command exits.
///
/// # Errors
///
/// Returns an error if setup fails or the worker is disabled.
pub async fn execute(args: &WorkerArgs, resolved: &ResolvedConfig) -> Result<()> {
    let config = worker_config(args, resolved)?;
    let registry = open_seeded_registry(resolved)?;
    let queue = Arc::new(MemoryQueue::from_file(
        &args.queue,
        build_batch_classifier(resolved, &registry),
    )?);
    let sinks = build_sinks(resolved, args.no_event_log)?;
    let worker = PersistentWorker::new(queue.clone(), sinks, config);

    if launch(&worker).await? {
        let cancel = CancellationToken::new();
        let monitor = registry
            .spawn_health_monitor(resolved.config.classifier.monitor_interval(), cancel.clone());

        if args.exit_when_empty {
            tokio::select! {
                result = tokio::signal::ctrl_c() => log_interrupt(result),
                () = wait_until_empty(queue.as_ref(), &worker) => {
                    tracing::info!("queue drained");
                }
            }
        } else {
            log_interrupt(tokio::signal::ctrl_c().await);
        }

        worker.stop().await;
        cancel.cancel();
        if let Err(e) = monitor.await {
            tracing::debug!(error = %e, "health monitor task ended abnormally");
        }
    } else {
        tracing::info!("auto_start is off; running a single processing cycle");
        let outcome = worker.tick().await;
        tracing::info!(outcome = ?outcome, "manual cycle finished");
    }
    registry.flush_if_dirty()?;

    if let Some(path) = &args.output {
        write_json_file(path, &queue.results())?;
    }

    let report = WorkerReport {
        status: worker.status(),
        metrics: worker.metrics(),
    };
    let output = render::render(
        "worker",
        &report,
        Vec::new(),
        resolved.format,
        resolved.pretty,
        |r| human::render_worker_status(&r.status, &r.metrics),
    )?;
    println!("{}", output.trim_end());
    Ok(())
}

fn worker_config(args: &WorkerArgs, resolved: &ResolvedConfig) -> Result<WorkerConfig> {
    let mut config = resolved.config.worker.worker_config();
    if let Some(secs) = args.interval {
        if secs == 0 {
            return Err(AicwError::ConfigInvalid {
                key: "--interval".to_string(),
                value: secs.to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        config.processing_interval = Duration::from_secs(secs);
    }
    Ok(config)
}

/// Start the worker when `auto_start` allows it.
///
/// Returns `false` when the worker is enabled but `auto_start` is off.
async fn launch(worker: &PersistentWorker) -> Result<bool> {
    if !worker.config().enabled {
        return Err(AicwError::WorkerState(
            "worker is disabled in configuration".to_string(),
        ));
    }
    worker.auto_start().await
}

fn log_interrupt(result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::info!("interrupt received; stopping worker"),
        Err(e) => tracing::warn!(error = %e, "cannot listen for interrupt; stopping worker"),
    }
}

/// Resolve once nothing is pending or in flight.
async fn wait_until_empty(queue: &dyn QueueStore, worker: &PersistentWorker) {
    let mut ticker = tokio::time::interval(EMPTY_POLL);
    loop {
        ticker.tick().await;
        match queue.metrics().await {
            Ok(metrics) if metrics.pending == 0 && metrics.processing == 0 => {
                if !worker.status().is_processing {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "queue metrics unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sinks::Sinks;
    use crate::storage::config::{Config, ConfigSources};
    use crate::test_utils::ScriptedQueue;
    use std::path::PathBuf;

    fn resolved() -> ResolvedConfig {
        ResolvedConfig {
            config: Config::default(),
            config_path: PathBuf::from("config.toml"),
            format: crate::cli::OutputFormat::Human,
            pretty: false,
            verbose: false,
            sources: ConfigSources::default(),
        }
    }

    fn args(interval: Option<u64>) -> WorkerArgs {
        WorkerArgs {
            queue: PathBuf::from("queue.json"),
            interval,
            exit_when_empty: true,
            output: None,
            no_event_log: true,
        }
    }

    #[test]
    fn interval_flag_overrides_config() {
        let config = worker_config(&args(Some(5)), &resolved()).unwrap();
        assert_eq!(config.processing_interval, Duration::from_secs(5));
        assert!(worker_config(&args(Some(0)), &resolved()).is_err());
    }

    fn worker_with(enabled: bool, auto_start: bool) -> PersistentWorker {
        let config = WorkerConfig {
            enabled,
            auto_start,
            ..WorkerConfig::default()
        };
        PersistentWorker::new(Arc::new(ScriptedQueue::new(3, 5)), Sinks::tracing(), config)
    }

    #[tokio::test]
    async fn launch_schedules_when_auto_start_is_on() {
        let worker = worker_with(true, true);
        assert!(launch(&worker).await.unwrap());
        assert!(worker.status().is_running);
        worker.stop().await;
    }

    #[tokio::test]
    async fn launch_leaves_worker_stopped_when_auto_start_is_off() {
        let worker = worker_with(true, false);
        assert!(!launch(&worker).await.unwrap());
        assert!(!worker.status().is_running);
    }

    #[tokio::test]
    async fn launch_rejects_disabled_worker() {
        let worker = worker_with(false, true);
        assert!(matches!(launch(&worker).await, Err(AicwError::WorkerState(_))));
    }

    #[test]
    fn auto_start_setting_reaches_worker_config() {
        let mut resolved = resolved();
        resolved.config.worker.auto_start = false;
        assert!(!worker_config(&args(None), &resolved).unwrap().auto_start);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_wait_returns_when_drained() {
        let queue = Arc::new(ScriptedQueue::new(0, 5));
        let worker = PersistentWorker::new(queue.clone(), Sinks::tracing(), WorkerConfig::default());
        tokio::time::timeout(Duration::from_secs(5), wait_until_empty(queue.as_ref(), &worker))
            .await
            .unwrap();
    }
}
