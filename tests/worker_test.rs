//! Workers driving the real classification stack end to end.
//!
//! Scripted transport underneath, real registry, classifier, batch
//! classifier, in-memory queue and SQLite event log on top.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use aicw::core::batch::{BatchClassifier, BatchOptions};
use aicw::core::classifier::Classifier;
use aicw::core::fallback::FALLBACK_CONFIDENCE;
use aicw::core::queue::QueueStore;
use aicw::core::registry::{ProviderRegistry, RegistryOptions};
use aicw::core::sinks::{Sinks, WorkerEventKind};
use aicw::core::worker::{
    PersistentWorker, ServerlessConfig, ServerlessWorker, StopReason, TickOutcome, WorkerConfig,
};
use aicw::storage::events::SqliteEventLog;
use aicw::storage::queue::MemoryQueue;
use aicw::{FakeReply, FakeTransport, make_new_provider, make_test_articles};

use common::logger::TestLogger;

struct Stack {
    transport: Arc<FakeTransport>,
    queue: Arc<MemoryQueue>,
    log: Arc<SqliteEventLog>,
    _dir: TempDir,
}

fn stack(articles: usize) -> Stack {
    let transport = Arc::new(FakeTransport::new());
    let registry = Arc::new(ProviderRegistry::new(
        transport.clone(),
        RegistryOptions::default(),
    ));
    registry.create_provider(make_new_provider("Primary")).unwrap();

    let batch = Arc::new(BatchClassifier::new(
        Arc::new(Classifier::new(registry)),
        BatchOptions {
            batch_size: 3,
            delay_between_batches: Duration::ZERO,
            item_delay: Duration::ZERO,
            enable_batching: true,
            max_concurrent_requests: 2,
        },
    ));
    let queue = Arc::new(MemoryQueue::new(batch));
    queue.enqueue(make_test_articles(articles));

    let dir = TempDir::new().unwrap();
    let log = Arc::new(SqliteEventLog::open(&dir.path().join("events.sqlite")).unwrap());
    Stack {
        transport,
        queue,
        log,
        _dir: dir,
    }
}

fn sinks(log: &Arc<SqliteEventLog>) -> Sinks {
    Sinks::new(log.clone(), log.clone())
}

fn serverless_config() -> ServerlessConfig {
    ServerlessConfig {
        enabled: true,
        inter_batch_pause: Duration::from_millis(10),
        ..ServerlessConfig::default()
    }
}

#[tokio::test]
async fn serverless_session_drains_queue_into_event_log() {
    let log = TestLogger::new("serverless_session_drains_queue_into_event_log");

    log.phase("setup");
    let stack = stack(12);
    let worker = ServerlessWorker::new(stack.queue.clone(), sinks(&stack.log), serverless_config());

    log.phase("test");
    let outcome = worker.run().await;

    log.phase("verify");
    assert!(outcome.success, "{}", outcome.message);
    let summary = outcome.summary.unwrap();
    assert_eq!(summary.total_successful, 12);
    assert_eq!(summary.total_failed, 0);
    assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
    assert_eq!(stack.queue.results().len(), 12);
    assert_eq!(stack.queue.metrics().await.unwrap().completed, 12);

    let events = stack.log.recent_events(100).unwrap();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&WorkerEventKind::WorkerSessionStart));
    assert!(kinds.contains(&WorkerEventKind::WorkerSessionComplete));
    assert!(kinds.contains(&WorkerEventKind::WorkerBatchComplete));
    let snapshots = stack.log.recent_snapshots(100).unwrap();
    assert_eq!(snapshots.len(), summary.batches_completed);
    assert_eq!(snapshots.iter().map(|s| s.success_count).sum::<usize>(), 12);
    log.finish_ok();
}

#[tokio::test]
async fn failing_provider_still_completes_items_via_fallback() {
    let log = TestLogger::new("failing_provider_still_completes_items_via_fallback");

    let stack = stack(4);
    stack.transport.script("primary", FakeReply::ApiError(503));
    let worker = ServerlessWorker::new(stack.queue.clone(), sinks(&stack.log), serverless_config());

    let outcome = worker.run().await;

    assert!(outcome.success);
    let results = stack.queue.results();
    assert_eq!(results.len(), 4);
    for (_, result) in &results {
        assert!((result.confidence_score - FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
    }
    assert!(stack.transport.complete_count("primary") >= 4);
    log.finish_ok();
}

#[tokio::test]
async fn persistent_ticks_process_one_batch_each() {
    let log = TestLogger::new("persistent_ticks_process_one_batch_each");

    let stack = stack(7);
    let worker = PersistentWorker::new(
        stack.queue.clone(),
        sinks(&stack.log),
        WorkerConfig {
            enabled: true,
            ..WorkerConfig::default()
        },
    );

    let mut ticks = 0;
    loop {
        match worker.tick().await {
            TickOutcome::Processed(result) => {
                assert!(result.processed > 0);
                ticks += 1;
            }
            TickOutcome::Idle => break,
            other => panic!("unexpected tick outcome: {other:?}"),
        }
        assert!(ticks <= 7, "queue never drained");
    }

    let metrics = worker.metrics();
    assert_eq!(metrics.total_processed, 7);
    assert_eq!(metrics.total_errors, 0);
    assert_eq!(metrics.batches_completed, ticks);
    assert_eq!(stack.queue.results().len(), 7);
    assert_eq!(
        stack
            .log
            .recent_events(100)
            .unwrap()
            .iter()
            .filter(|e| e.kind == WorkerEventKind::WorkerBatchComplete)
            .count() as u64,
        ticks
    );
    log.finish_ok();
}

#[tokio::test]
async fn persistent_worker_lifecycle_is_logged() {
    let log = TestLogger::new("persistent_worker_lifecycle_is_logged");

    let stack = stack(3);
    let worker = PersistentWorker::new(
        stack.queue.clone(),
        sinks(&stack.log),
        WorkerConfig {
            enabled: true,
            processing_interval: Duration::from_millis(200),
            ..WorkerConfig::default()
        },
    );

    worker.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !stack.queue.results().len().eq(&3) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("worker did not drain the queue");
    worker.stop().await;

    let kinds: Vec<_> = stack
        .log
        .recent_events(100)
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&WorkerEventKind::WorkerStart));
    assert!(kinds.contains(&WorkerEventKind::WorkerStop));
    assert!(!worker.status().is_running);
    log.finish_ok();
}
