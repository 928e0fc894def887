//! In-memory work queue.
//!
//! Items move `pending -> processing -> completed | failed`. A failed item
//! returns to pending until it has been attempted `max_retries` times.
//! Items skipped by cancellation return to pending without spending an
//! attempt. Batch size per call follows the batch classifier's
//! `optimal_batch_size` for the current depth and host load.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::batch::BatchClassifier;
use crate::core::models::{Article, ClassificationResult};
use crate::core::queue::{ProcessingResult, QueueMetrics, QueueStore};
use crate::core::registry::elapsed_millis;
use crate::core::resources;
use crate::error::{AicwError, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub article: Article,
    pub status: ItemStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ClassificationResult>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    fn pending(article: Article) -> Self {
        Self {
            article,
            status: ItemStatus::Pending,
            attempts: 0,
            last_error: None,
            result: None,
            updated_at: Utc::now(),
        }
    }
}

pub struct MemoryQueue {
    items: Mutex<Vec<QueueItem>>,
    batch: Arc<BatchClassifier>,
    max_retries: u32,
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("items", &self.lock().len())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl MemoryQueue {
    #[must_use]
    pub fn new(batch: Arc<BatchClassifier>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            batch,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Clamped to at least one attempt.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Queue built from a JSON array of articles.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not an article array.
    pub fn from_file(path: &Path, batch: Arc<BatchClassifier>) -> Result<Self> {
        let articles = load_articles(path)?;
        let queue = Self::new(batch);
        queue.enqueue(articles);
        Ok(queue)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, articles: impl IntoIterator<Item = Article>) {
        let mut items = self.lock();
        let before = items.len();
        items.extend(articles.into_iter().map(QueueItem::pending));
        tracing::debug!(added = items.len() - before, "articles enqueued");
    }

    /// Snapshot of every item.
    #[must_use]
    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().clone()
    }

    /// Results of completed items, in queue order.
    #[must_use]
    pub fn results(&self) -> Vec<(String, ClassificationResult)> {
        self.lock()
            .iter()
            .filter_map(|item| {
                item.result
                    .clone()
                    .map(|result| (item.article.id.clone(), result))
            })
            .collect()
    }

    /// Move up to `limit` pending items to processing.
    fn claim(&self, limit: usize) -> Vec<Article> {
        let now = Utc::now();
        self.lock()
            .iter_mut()
            .filter(|item| item.status == ItemStatus::Pending)
            .take(limit)
            .map(|item| {
                item.status = ItemStatus::Processing;
                item.updated_at = now;
                item.article.clone()
            })
            .collect()
    }

    fn settle(&self, claimed: &[Article], outcome: &crate::core::batch::BatchOutcome) {
        let now = Utc::now();
        let mut items = self.lock();
        for article in claimed {
            let Some(item) = items
                .iter_mut()
                .find(|item| item.status == ItemStatus::Processing && item.article.id == article.id)
            else {
                continue;
            };
            item.updated_at = now;

            if let Some(result) = outcome.results.get(&article.id) {
                item.attempts += 1;
                item.status = ItemStatus::Completed;
                item.result = Some(result.clone());
                item.last_error = None;
            } else if let Some(error) = outcome.errors.get(&article.id) {
                item.attempts += 1;
                item.last_error = Some(error.clone());
                item.status = if item.attempts >= self.max_retries {
                    tracing::warn!(article_id = %article.id, attempts = item.attempts, "item failed permanently");
                    ItemStatus::Failed
                } else {
                    ItemStatus::Pending
                };
            } else {
                item.status = ItemStatus::Pending;
            }
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn metrics(&self) -> Result<QueueMetrics> {
        let items = self.lock();
        let mut metrics = QueueMetrics::default();
        for item in items.iter() {
            match item.status {
                ItemStatus::Pending => metrics.pending += 1,
                ItemStatus::Processing => metrics.processing += 1,
                ItemStatus::Completed => metrics.completed += 1,
                ItemStatus::Failed => metrics.failed += 1,
            }
        }
        Ok(metrics)
    }

    async fn process_queue(&self, cancel: &CancellationToken) -> Result<ProcessingResult> {
        let started = Instant::now();
        let pending = self.metrics().await?.pending;
        let limit = self.batch.optimal_batch_size(pending, resources::load_ratio());
        let claimed = self.claim(limit);
        if claimed.is_empty() {
            return Ok(ProcessingResult::default());
        }

        tracing::debug!(claimed = claimed.len(), pending, "claimed queue items");
        let outcome = self.batch.classify_batch(&claimed, cancel).await;
        self.settle(&claimed, &outcome);

        Ok(ProcessingResult {
            processed: outcome.processed(),
            successful: outcome.successful,
            failed: outcome.failed,
            skipped: outcome.skipped.len(),
            processing_time_ms: elapsed_millis(started),
        })
    }
}

/// Read a JSON array of articles.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_articles(path: &Path) -> Result<Vec<Article>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AicwError::Config(format!("cannot read articles from {}: {e}", path.display()))
    })?;
    let articles: Vec<Article> = serde_json::from_str(&content)?;
    Ok(articles)
}
