//! Single-article classification with provider failover.
//!
//! Up to `max_attempts` providers are tried, each picked by the registry
//! with every previously failed provider excluded. A call fails on transport
//! error, non-success status, timeout, or a reply without the required
//! fields. When every attempt fails, or no provider is left, the keyword
//! fallback produces the result. Classification never returns an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::fallback;
use crate::core::models::{Article, ClassificationResult};
use crate::core::prompt::{SYSTEM_PROMPT, build_prompt, parse_classification};
use crate::core::registry::{ProviderRegistry, elapsed_millis};
use crate::error::{AicwError, Result};
use crate::providers::ProviderTransport;

/// Provider selections per classification, at most.
pub const MAX_ATTEMPTS: usize = 3;

/// One provider call made while classifying an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub provider_id: String,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A classification plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationOutcome {
    pub result: ClassificationResult,
    /// Provider that produced the result; `None` for the fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub attempts: Vec<Attempt>,
}

impl ClassificationOutcome {
    #[must_use]
    pub const fn used_fallback(&self) -> bool {
        self.provider_id.is_none()
    }
}

/// Anything that can classify one article.
///
/// The batch classifier is written against this so tests can inject
/// failures and count concurrency.
#[async_trait]
pub trait ItemClassifier: Send + Sync {
    async fn classify_item(&self, article: &Article) -> Result<ClassificationOutcome>;
}

/// Provider-backed classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    registry: Arc<ProviderRegistry>,
    max_attempts: usize,
}

impl Classifier {
    #[must_use]
    pub const fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Clamped to `1..=MAX_ATTEMPTS`.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.clamp(1, MAX_ATTEMPTS);
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Classify `article`. Never fails.
    pub async fn classify(&self, article: &Article) -> ClassificationResult {
        self.classify_detailed(article).await.result
    }

    /// Classify `article`, keeping the per-attempt record.
    pub async fn classify_detailed(&self, article: &Article) -> ClassificationOutcome {
        let transport = self.registry.transport();
        let prompt = build_prompt(article);
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempts = Vec::new();

        for attempt in 1..=self.max_attempts {
            let Some(provider) = self.registry.select_provider(&excluded).await else {
                tracing::debug!(article_id = %article.id, attempt, "no provider left to try");
                break;
            };

            let started = Instant::now();
            let outcome = call_provider(transport.as_ref(), &provider, &prompt).await;
            let latency_ms = elapsed_millis(started);

            match outcome {
                Ok((result, reply_len)) => {
                    let cost = provider.config.estimate_cost(prompt.len() + reply_len);
                    self.registry
                        .record_usage(&provider.id, true, latency_ms, cost);
                    tracing::info!(
                        article_id = %article.id,
                        provider_id = %provider.id,
                        attempt,
                        latency_ms,
                        "article classified"
                    );
                    attempts.push(Attempt {
                        provider_id: provider.id.clone(),
                        success: true,
                        latency_ms,
                        error: None,
                    });
                    return ClassificationOutcome {
                        result,
                        provider_id: Some(provider.id),
                        attempts,
                    };
                }
                Err(e) => {
                    self.registry
                        .record_usage(&provider.id, false, latency_ms, None);
                    tracing::warn!(
                        article_id = %article.id,
                        provider_id = %provider.id,
                        attempt,
                        latency_ms,
                        error_code = e.error_code(),
                        error = %e,
                        "provider attempt failed"
                    );
                    attempts.push(Attempt {
                        provider_id: provider.id.clone(),
                        success: false,
                        latency_ms,
                        error: Some(e.to_string()),
                    });
                    excluded.insert(provider.id);
                }
            }
        }

        tracing::warn!(
            article_id = %article.id,
            attempts = attempts.len(),
            "falling back to keyword classification"
        );
        ClassificationOutcome {
            result: fallback::classify(article),
            provider_id: None,
            attempts,
        }
    }
}

#[async_trait]
impl ItemClassifier for Classifier {
    async fn classify_item(&self, article: &Article) -> Result<ClassificationOutcome> {
        Ok(self.classify_detailed(article).await)
    }
}

/// One call under the provider's hard timeout. Returns the parsed result and reply length.
async fn call_provider(
    transport: &dyn ProviderTransport,
    provider: &crate::core::provider::Provider,
    prompt: &str,
) -> Result<(ClassificationResult, usize)> {
    let timeout = provider.config.timeout();
    let reply = tokio::time::timeout(timeout, transport.complete(provider, SYSTEM_PROMPT, prompt))
        .await
        .map_err(|_| AicwError::Timeout {
            provider: provider.id.clone(),
            millis: provider.config.timeout_ms,
        })??;
    let result = parse_classification(&reply)?;
    Ok((result, reply.len()))
}
