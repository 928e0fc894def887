//! Test utilities for aicw.
//!
//! Data factories, scripted fakes for every async seam (transport,
//! classifier, queue, sinks), a temp directory helper and assertion macros.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aicw::test_utils::*;
//!
//! let transport = Arc::new(FakeTransport::new());
//! transport.script("openai-main", FakeReply::ApiError(503));
//! let article = make_test_article("a1", "Title", "Body");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::core::classifier::{ClassificationOutcome, ItemClassifier};
use crate::core::models::{Article, ClassificationResult, DiscriminationType, Entities, Location, Severity};
use crate::core::provider::{NewProvider, Provider, ProviderConfig, ProviderType, UsageStats};
use crate::core::queue::{ProcessingResult, QueueMetrics, QueueStore};
use crate::core::secrets::ApiKeyRef;
use crate::core::sinks::{AnalyticsSink, EventSink, MetricsSnapshot, Sinks, WorkerEvent, WorkerEventKind};
use crate::error::{AicwError, Result};
use crate::providers::ProviderTransport;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Test Data Factories
// =============================================================================

/// Env var the test providers point their key at. Never set by tests.
pub const TEST_KEY_ENV: &str = "AICW_TEST_API_KEY";

/// A provider reply that parses into a NATIONAL / `GENERAL_AI` / MEDIUM result.
pub const VALID_REPLY: &str = r#"Here is the classification:
{
  "location": "NATIONAL",
  "discriminationType": "GENERAL_AI",
  "severity": "MEDIUM",
  "confidenceScore": 0.82,
  "reasoning": "Federal agency guidance on automated hiring tools",
  "entities": {
    "locations": ["United States"],
    "people": [],
    "organizations": ["EEOC"]
  },
  "keywords": ["ai", "hiring", "bias"]
}"#;

#[must_use]
pub fn make_test_article(id: &str, title: &str, content: &str) -> Article {
    Article {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        source: Some("Test Wire".to_string()),
        url: Some(format!("https://news.example.com/{id}")),
    }
}

/// `n` articles with ids `article-0`, `article-1`, ...
#[must_use]
pub fn make_test_articles(n: usize) -> Vec<Article> {
    (0..n)
        .map(|i| {
            make_test_article(
                &format!("article-{i}"),
                &format!("AI screening story {i}"),
                "An automated system was reported to treat applicants unfairly.",
            )
        })
        .collect()
}

#[must_use]
pub fn make_test_result() -> ClassificationResult {
    ClassificationResult {
        location: Location::National,
        discrimination_type: DiscriminationType::GeneralAi,
        severity: Severity::Medium,
        confidence_score: 0.82,
        reasoning: "test".to_string(),
        entities: Entities::default(),
        keywords: vec!["ai".to_string()],
    }
}

/// Enabled `OpenAI` provider with default config and fresh counters.
#[must_use]
pub fn make_test_provider(id: &str, priority: i32) -> Provider {
    let now = Utc::now();
    Provider {
        id: id.to_string(),
        name: format!("Test {id}"),
        provider_type: ProviderType::OpenAi,
        enabled: true,
        priority,
        config: ProviderConfig::for_type(ProviderType::OpenAi, ApiKeyRef::env(TEST_KEY_ENV)),
        rate_limits: ProviderType::OpenAi.default_rate_limits(),
        usage: UsageStats::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Creation request with a generated id.
#[must_use]
pub fn make_new_provider(name: &str) -> NewProvider {
    NewProvider {
        id: None,
        name: name.to_string(),
        provider_type: ProviderType::OpenAi,
        enabled: true,
        priority: 1,
        config: ProviderConfig::for_type(ProviderType::OpenAi, ApiKeyRef::env(TEST_KEY_ENV)),
        rate_limits: None,
    }
}

/// Creation request that keeps `provider`'s id.
#[must_use]
pub fn make_new_provider_from(provider: Provider) -> NewProvider {
    NewProvider {
        id: Some(provider.id),
        name: provider.name,
        provider_type: provider.provider_type,
        enabled: provider.enabled,
        priority: provider.priority,
        config: provider.config,
        rate_limits: Some(provider.rate_limits),
    }
}

// =============================================================================
// Fake Transport
// =============================================================================

/// What [`FakeTransport`] answers for one provider.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Text(String),
    ApiError(u16),
    /// Never answers.
    Hang,
    /// [`VALID_REPLY`] after a pause.
    Delay(Duration),
}

/// Scripted [`ProviderTransport`]. Unscripted providers answer [`VALID_REPLY`].
#[derive(Debug, Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, FakeReply>>,
    failing_probes: Mutex<HashSet<String>>,
    probes: Mutex<HashMap<String, usize>>,
    completions: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, provider_id: &str, reply: FakeReply) {
        lock(&self.replies).insert(provider_id.to_string(), reply);
    }

    pub fn fail_probe(&self, provider_id: &str) {
        lock(&self.failing_probes).insert(provider_id.to_string());
    }

    #[must_use]
    pub fn probe_count(&self, provider_id: &str) -> usize {
        lock(&self.probes).get(provider_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn complete_count(&self, provider_id: &str) -> usize {
        lock(&self.completions).get(provider_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderTransport for FakeTransport {
    async fn complete(&self, provider: &Provider, _system: &str, _prompt: &str) -> Result<String> {
        *lock(&self.completions).entry(provider.id.clone()).or_default() += 1;
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        let reply = lock(&self.replies).get(&provider.id).cloned();

        match reply {
            None => Ok(VALID_REPLY.to_string()),
            Some(FakeReply::Text(text)) => Ok(text),
            Some(FakeReply::ApiError(status)) => Err(AicwError::ProviderApiError {
                provider: provider.id.clone(),
                status_code: Some(status),
                message: format!("HTTP {status}: scripted failure"),
            }),
            Some(FakeReply::Hang) => std::future::pending().await,
            Some(FakeReply::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(VALID_REPLY.to_string())
            }
        }
    }

    async fn probe(&self, provider: &Provider) -> Result<()> {
        *lock(&self.probes).entry(provider.id.clone()).or_default() += 1;
        if lock(&self.failing_probes).contains(&provider.id) {
            return Err(AicwError::ProviderUnavailable(provider.id.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// Scripted Classifier
// =============================================================================

/// [`ItemClassifier`] with injectable delay, failures and panics.
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    delay: Duration,
    fail_ids: HashSet<String>,
    panic_ids: HashSet<String>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn fail_on(mut self, article_id: &str) -> Self {
        self.fail_ids.insert(article_id.to_string());
        self
    }

    #[must_use]
    pub fn panic_on(mut self, article_id: &str) -> Self {
        self.panic_ids.insert(article_id.to_string());
        self
    }

    /// Cancel `token` once `calls` classifications have completed.
    pub fn cancel_after(&self, calls: usize, token: CancellationToken) {
        *lock(&self.cancel_after) = Some((calls, token));
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemClassifier for ScriptedClassifier {
    async fn classify_item(&self, article: &Article) -> Result<ClassificationOutcome> {
        let outcome = {
            let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            assert!(
                !self.panic_ids.contains(&article.id),
                "scripted panic for {}",
                article.id
            );
            if self.fail_ids.contains(&article.id) {
                Err(AicwError::ProviderUnavailable(format!(
                    "scripted failure for {}",
                    article.id
                )))
            } else {
                Ok(ClassificationOutcome {
                    result: make_test_result(),
                    provider_id: Some("scripted".to_string()),
                    attempts: Vec::new(),
                })
            }
        };

        let done = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = lock(&self.cancel_after).as_ref()
            && done >= *after
        {
            token.cancel();
        }
        outcome
    }
}

// =============================================================================
// Scripted Queue
// =============================================================================

/// In-memory [`QueueStore`] that "processes" up to `batch_size` pending
/// items per call, all successfully, unless a reply is scripted.
#[derive(Debug)]
pub struct ScriptedQueue {
    pending: AtomicUsize,
    completed: AtomicUsize,
    batch_size: usize,
    delay: Duration,
    scripted: Mutex<VecDeque<Result<ProcessingResult>>>,
    metrics_fail: Mutex<bool>,
    calls: AtomicUsize,
}

impl ScriptedQueue {
    #[must_use]
    pub const fn new(pending: usize, batch_size: usize) -> Self {
        Self {
            pending: AtomicUsize::new(pending),
            completed: AtomicUsize::new(0),
            batch_size,
            delay: Duration::ZERO,
            scripted: Mutex::new(VecDeque::new()),
            metrics_fail: Mutex::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Each `process_queue` call sleeps this long first.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer the next call with `reply` instead of processing.
    pub fn push_reply(&self, reply: Result<ProcessingResult>) {
        lock(&self.scripted).push_back(reply);
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    pub fn fail_metrics(&self, fail: bool) {
        *lock(&self.metrics_fail) = fail;
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueStore for ScriptedQueue {
    async fn metrics(&self) -> Result<QueueMetrics> {
        if *lock(&self.metrics_fail) {
            return Err(AicwError::Storage("scripted metrics failure".to_string()));
        }
        Ok(QueueMetrics {
            pending: self.pending(),
            processing: 0,
            completed: self.completed.load(Ordering::SeqCst),
            failed: 0,
        })
    }

    async fn process_queue(&self, cancel: &CancellationToken) -> Result<ProcessingResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = lock(&self.scripted).pop_front();
        if let Some(reply) = scripted {
            return reply;
        }

        let claimed = self.pending().min(self.batch_size);
        if cancel.is_cancelled() {
            return Ok(ProcessingResult {
                skipped: claimed,
                ..ProcessingResult::default()
            });
        }
        self.pending.fetch_sub(claimed, Ordering::SeqCst);
        self.completed.fetch_add(claimed, Ordering::SeqCst);
        Ok(ProcessingResult {
            processed: claimed,
            successful: claimed,
            failed: 0,
            skipped: 0,
            processing_time_ms: 1,
        })
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Keeps every snapshot and event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<MetricsSnapshot>>,
    events: Mutex<Vec<WorkerEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Sinks`] pair that records into `self`.
    #[must_use]
    pub fn sinks(self: &Arc<Self>) -> Sinks {
        Sinks::new(
            Arc::clone(self) as Arc<dyn AnalyticsSink>,
            Arc::clone(self) as Arc<dyn EventSink>,
        )
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<MetricsSnapshot> {
        lock(&self.snapshots).clone()
    }

    #[must_use]
    pub fn events(&self) -> Vec<WorkerEvent> {
        lock(&self.events).clone()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<WorkerEventKind> {
        lock(&self.events).iter().map(|e| e.kind).collect()
    }

    #[must_use]
    pub fn count(&self, kind: WorkerEventKind) -> usize {
        lock(&self.events).iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn record_metrics(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        lock(&self.snapshots).push(snapshot.clone());
        Ok(())
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn log_event(&self, event: &WorkerEvent) -> Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Temp Directory Utilities
// =============================================================================

/// A temporary directory that is deleted on drop.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Write `content` to `name`, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
        path
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert that a string contains a substring.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {{
        let haystack = &$haystack;
        let needle = $needle;
        assert!(
            haystack.contains(needle),
            "Expected string to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    }};
    ($haystack:expr, $needle:expr, $($arg:tt)*) => {{
        let haystack = &$haystack;
        let needle = $needle;
        assert!(haystack.contains(needle), $($arg)*);
    }};
}

/// Assert two floats are within `epsilon` (default `1e-9`).
#[macro_export]
macro_rules! assert_float_eq {
    ($left:expr, $right:expr) => {
        $crate::assert_float_eq!($left, $right, 1e-9)
    };
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left;
        let right: f64 = $right;
        assert!(
            (left - right).abs() < $epsilon,
            "Expected {} to be within {} of {}",
            left,
            $epsilon,
            right
        );
    }};
}
