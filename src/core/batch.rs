//! Batch classification.
//!
//! Small inputs (two items or fewer) or disabled batching run sequentially
//! with a courtesy delay between items. Larger inputs are split into chunks
//! of `batch_size`; chunks run one after another, and items inside a chunk
//! run concurrently behind a semaphore of `max_concurrent_requests` permits.
//!
//! A chunk that fails as a whole (a classification task panics) marks its
//! unresolved items failed with a synthetic message; later chunks still run.
//! The cancellation token is checked before every item and chunk; items not
//! started when it fires are reported as skipped, not failed.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::classifier::{ClassificationOutcome, ItemClassifier};
use crate::core::models::{Article, ClassificationResult};
use crate::core::registry::elapsed_millis;
use crate::error::{AicwError, Result};

/// Inputs at or below this size never use the concurrent path.
pub const SEQUENTIAL_THRESHOLD: usize = 2;

/// Largest size `optimal_batch_size` suggests when scaling up.
pub const MAX_SUGGESTED_BATCH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    /// Delay between items on the sequential path.
    pub item_delay: Duration,
    pub enable_batching: bool,
    pub max_concurrent_requests: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            delay_between_batches: Duration::from_millis(2000),
            item_delay: Duration::from_millis(500),
            enable_batching: true,
            max_concurrent_requests: 3,
        }
    }
}

/// Partial options change. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptionsUpdate {
    pub batch_size: Option<usize>,
    pub delay_between_batches: Option<Duration>,
    pub item_delay: Option<Duration>,
    pub enable_batching: Option<bool>,
    pub max_concurrent_requests: Option<usize>,
}

/// Aggregated result of one batch call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub successful: usize,
    pub failed: usize,
    /// Successful items whose result came from the keyword fallback.
    pub fallback: usize,
    pub results: BTreeMap<String, ClassificationResult>,
    pub errors: BTreeMap<String, String>,
    /// Items never started because of cancellation.
    pub skipped: Vec<String>,
    pub processing_time_ms: u64,
}

impl BatchOutcome {
    fn record(&mut self, article_id: String, outcome: Result<ClassificationOutcome>) {
        match outcome {
            Ok(outcome) => {
                if outcome.used_fallback() {
                    self.fallback += 1;
                }
                self.successful += 1;
                self.results.insert(article_id, outcome.result);
            }
            Err(e) => {
                self.failed += 1;
                self.errors.insert(article_id, e.to_string());
            }
        }
    }

    fn fail(&mut self, article_id: String, message: String) {
        self.failed += 1;
        self.errors.insert(article_id, message);
    }

    #[must_use]
    pub const fn processed(&self) -> usize {
        self.successful + self.failed
    }
}

enum ItemOutcome {
    Done(Result<ClassificationOutcome>),
    Skipped,
}

pub struct BatchClassifier {
    classifier: Arc<dyn ItemClassifier>,
    options: RwLock<BatchOptions>,
}

impl std::fmt::Debug for BatchClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchClassifier")
            .field("options", &self.options())
            .finish_non_exhaustive()
    }
}

impl BatchClassifier {
    #[must_use]
    pub fn new(classifier: Arc<dyn ItemClassifier>, options: BatchOptions) -> Self {
        Self {
            classifier,
            options: RwLock::new(sanitize(options)),
        }
    }

    #[must_use]
    pub fn options(&self) -> BatchOptions {
        *self.options.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `update` into the current options.
    pub fn update_options(&self, update: BatchOptionsUpdate) {
        let mut options = self.options.write().unwrap_or_else(PoisonError::into_inner);
        let merged = BatchOptions {
            batch_size: update.batch_size.unwrap_or(options.batch_size),
            delay_between_batches: update
                .delay_between_batches
                .unwrap_or(options.delay_between_batches),
            item_delay: update.item_delay.unwrap_or(options.item_delay),
            enable_batching: update.enable_batching.unwrap_or(options.enable_batching),
            max_concurrent_requests: update
                .max_concurrent_requests
                .unwrap_or(options.max_concurrent_requests),
        };
        *options = sanitize(merged);
        tracing::info!(options = ?*options, "batch options updated");
    }

    /// Suggested batch size for a queue of `queue_depth` under `load` (0..1).
    ///
    /// Advisory only; `classify_batch` always uses the configured size.
    #[must_use]
    pub fn optimal_batch_size(&self, queue_depth: usize, load: f64) -> usize {
        let base = self.options().batch_size;
        let mut size = if queue_depth > 100 {
            base.saturating_mul(2).min(MAX_SUGGESTED_BATCH)
        } else if queue_depth < 10 {
            base.div_ceil(2).max(2)
        } else {
            base
        };
        if load > 0.8 {
            size = size.saturating_sub(2).max(1);
        }
        size
    }

    /// Classify `articles`, stopping early if `cancel` fires.
    pub async fn classify_batch(
        &self,
        articles: &[Article],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let started = Instant::now();
        let options = self.options();
        let mut outcome = BatchOutcome::default();

        if !articles.is_empty() {
            if !options.enable_batching || articles.len() <= SEQUENTIAL_THRESHOLD {
                self.classify_sequentially(articles, &options, cancel, &mut outcome)
                    .await;
            } else {
                self.classify_in_chunks(articles, &options, cancel, &mut outcome)
                    .await;
            }
        }

        outcome.processing_time_ms = elapsed_millis(started);
        tracing::info!(
            total = articles.len(),
            successful = outcome.successful,
            failed = outcome.failed,
            skipped = outcome.skipped.len(),
            processing_time_ms = outcome.processing_time_ms,
            "batch classification finished"
        );
        outcome
    }

    async fn classify_sequentially(
        &self,
        articles: &[Article],
        options: &BatchOptions,
        cancel: &CancellationToken,
        outcome: &mut BatchOutcome,
    ) {
        tracing::debug!(count = articles.len(), "classifying individually");
        for (index, article) in articles.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome
                    .skipped
                    .extend(articles[index..].iter().map(|a| a.id.clone()));
                return;
            }

            let result = self.classifier.classify_item(article).await;
            outcome.record(article.id.clone(), result);

            if index + 1 < articles.len() {
                pause(options.item_delay, cancel).await;
            }
        }
    }

    async fn classify_in_chunks(
        &self,
        articles: &[Article],
        options: &BatchOptions,
        cancel: &CancellationToken,
        outcome: &mut BatchOutcome,
    ) {
        let chunks: Vec<&[Article]> = articles.chunks(options.batch_size).collect();
        let total = chunks.len();
        tracing::debug!(
            count = articles.len(),
            chunks = total,
            batch_size = options.batch_size,
            "classifying in chunks"
        );

        for (index, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.skipped.extend(
                    chunks[index..]
                        .iter()
                        .flat_map(|c| c.iter().map(|a| a.id.clone())),
                );
                return;
            }

            if let Err(e) = self.run_chunk(chunk, options, cancel, outcome).await {
                tracing::error!(chunk = index + 1, total, error = %e, "chunk failed");
            } else {
                tracing::debug!(chunk = index + 1, total, "chunk completed");
            }

            if index + 1 < total {
                pause(options.delay_between_batches, cancel).await;
            }
        }
    }

    /// Run one chunk concurrently. On a chunk-level failure, every item that
    /// did not produce an outcome is marked failed and the error is returned.
    async fn run_chunk(
        &self,
        chunk: &[Article],
        options: &BatchOptions,
        cancel: &CancellationToken,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent_requests));
        let mut tasks = JoinSet::new();

        for article in chunk {
            let semaphore = Arc::clone(&semaphore);
            let classifier = Arc::clone(&self.classifier);
            let cancel = cancel.clone();
            let article = article.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let err = AicwError::BatchFailed("concurrency gate closed".to_string());
                    return (article.id, ItemOutcome::Done(Err(err)));
                };
                if cancel.is_cancelled() {
                    return (article.id, ItemOutcome::Skipped);
                }
                let result = classifier.classify_item(&article).await;
                (article.id, ItemOutcome::Done(result))
            });
        }

        let mut resolved: HashSet<String> = HashSet::new();
        let mut chunk_error: Option<AicwError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((article_id, ItemOutcome::Done(result))) => {
                    resolved.insert(article_id.clone());
                    outcome.record(article_id, result);
                }
                Ok((article_id, ItemOutcome::Skipped)) => {
                    resolved.insert(article_id.clone());
                    outcome.skipped.push(article_id);
                }
                Err(join_error) => {
                    if chunk_error.is_none() {
                        chunk_error = Some(AicwError::BatchFailed(join_error.to_string()));
                        tasks.abort_all();
                    }
                }
            }
        }

        let Some(err) = chunk_error else {
            return Ok(());
        };
        for article in chunk.iter().filter(|a| !resolved.contains(&a.id)) {
            outcome.fail(article.id.clone(), err.to_string());
        }
        Err(err)
    }
}

/// Sleep for `delay`, returning early if `cancel` fires.
async fn pause(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(delay) => {}
    }
}

fn sanitize(mut options: BatchOptions) -> BatchOptions {
    options.batch_size = options.batch_size.max(1);
    options.max_concurrent_requests = options
        .max_concurrent_requests
        .clamp(1, Semaphore::MAX_PERMITS);
    options
}
