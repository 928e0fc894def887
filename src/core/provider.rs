//! Provider records.
//!
//! A provider is one configured AI backend: a transport type, a model, a
//! priority, an enabled flag and rolling usage counters. The registry owns
//! the live set; this module only defines the records and their pure
//! update rules.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::secrets::ApiKeyRef;
use crate::error::{AicwError, Result};

// =============================================================================
// Provider Type
// =============================================================================

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI chat completions.
    OpenAi,
    /// Anthropic messages.
    Anthropic,
    /// Any OpenAI-compatible endpoint; `base_url` is required.
    Custom,
}

impl ProviderType {
    pub const ALL: &'static [Self] = &[Self::OpenAi, Self::Anthropic, Self::Custom];

    #[must_use]
    pub const fn cli_name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Custom => "custom",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Custom => "Custom (OpenAI-compatible)",
        }
    }

    /// Parse from CLI argument.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::InvalidProviderType`] for unknown names.
    pub fn from_cli_name(name: &str) -> Result<Self> {
        let lower = name.to_lowercase();
        Self::ALL
            .iter()
            .find(|p| p.cli_name() == lower)
            .copied()
            .ok_or_else(|| AicwError::InvalidProviderType(name.to_string()))
    }

    #[must_use]
    pub const fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Custom => None,
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Custom => "gpt-4o-mini",
            Self::Anthropic => "claude-3-haiku-20240307",
        }
    }

    /// Environment variable conventionally holding this type's key.
    #[must_use]
    pub const fn default_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Custom => "AICW_CUSTOM_API_KEY",
        }
    }

    #[must_use]
    pub const fn default_rate_limits(self) -> RateLimits {
        match self {
            Self::OpenAi => RateLimits {
                requests_per_minute: Some(500),
                tokens_per_minute: Some(10_000),
                tokens_per_day: None,
            },
            Self::Anthropic => RateLimits {
                requests_per_minute: Some(1000),
                tokens_per_minute: None,
                tokens_per_day: Some(100_000),
            },
            Self::Custom => RateLimits {
                requests_per_minute: Some(100),
                tokens_per_minute: None,
                tokens_per_day: None,
            },
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cli_name())
    }
}

// =============================================================================
// Config
// =============================================================================

pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Advisory rate limits. Recorded for display, not enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_day: Option<u32>,
}

/// Per-provider call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub api_key: ApiKeyRef,
    /// Fingerprint of the key seen when the provider was last configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Hard per-call timeout.
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Used for the per-call cost estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_1k_tokens: Option<f64>,
}

impl ProviderConfig {
    /// Defaults for `provider_type` with the given key reference.
    #[must_use]
    pub fn for_type(provider_type: ProviderType, api_key: ApiKeyRef) -> Self {
        Self {
            api_key,
            key_fingerprint: None,
            model: provider_type.default_model().to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            base_url: provider_type.default_base_url().map(String::from),
            cost_per_1k_tokens: None,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Rough cost of a call that moved `chars` characters, at four characters per token.
    #[must_use]
    pub fn estimate_cost(&self, chars: usize) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        let tokens = chars as f64 / 4.0;
        self.cost_per_1k_tokens.map(|rate| tokens / 1000.0 * rate)
    }
}

// =============================================================================
// Usage
// =============================================================================

/// Rolling usage counters.
///
/// Updated read-modify-write without cross-call coordination; concurrent
/// calls may under-count. Treat as a health signal, not a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// `success_count / request_count`, 1.0 before the first request.
    pub success_rate: f64,
    /// Incremental running mean in milliseconds.
    pub average_latency_ms: f64,
    pub estimated_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            error_count: 0,
            success_rate: 1.0,
            average_latency_ms: 0.0,
            estimated_cost: 0.0,
            last_used: None,
        }
    }

    /// Apply one call outcome.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, success: bool, latency_ms: u64, cost: Option<f64>, at: DateTime<Utc>) {
        self.request_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        let n = self.request_count as f64;
        self.success_rate = self.success_count as f64 / n;
        self.average_latency_ms = self.average_latency_ms.mul_add(n - 1.0, latency_ms as f64) / n;
        if let Some(cost) = cost {
            self.estimated_cost += cost;
        }
        self.last_used = Some(at);
    }

    /// `error_count / request_count`, 0.0 before the first request.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        }
    }
}

// =============================================================================
// Provider record
// =============================================================================

/// A configured provider with its usage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub enabled: bool,
    /// Higher is tried first.
    pub priority: i32,
    pub config: ProviderConfig,
    #[serde(default)]
    pub rate_limits: RateLimits,
    #[serde(default = "UsageStats::new")]
    pub usage: UsageStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    /// Base URL for calls, falling back to the type's default.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.config
            .base_url
            .as_deref()
            .or_else(|| self.provider_type.default_base_url())
            .map(|url| url.trim_end_matches('/'))
    }

    /// Routing order: priority desc, success rate desc, then id asc.
    #[must_use]
    pub fn routing_cmp(&self, other: &Self) -> Ordering {
        self.rank_cmp(other).then_with(|| self.id.cmp(&other.id))
    }

    /// Listing order: priority desc, success rate desc, then name asc.
    #[must_use]
    pub fn listing_cmp(&self, other: &Self) -> Ordering {
        self.rank_cmp(other)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.id.cmp(&other.id))
    }

    fn rank_cmp(&self, other: &Self) -> Ordering {
        other.priority.cmp(&self.priority).then_with(|| {
            other
                .usage
                .success_rate
                .partial_cmp(&self.usage.success_rate)
                .unwrap_or(Ordering::Equal)
        })
    }
}

/// Input for creating a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProvider {
    /// Generated from `name` when absent.
    pub id: Option<String>,
    pub name: String,
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub priority: i32,
    pub config: ProviderConfig,
    /// Defaults per provider type when absent.
    pub rate_limits: Option<RateLimits>,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub api_key: Option<ApiKeyRef>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
    pub base_url: Option<String>,
    pub cost_per_1k_tokens: Option<f64>,
    pub rate_limits: Option<RateLimits>,
}

impl ProviderUpdate {
    /// Apply to `provider`, returning whether the key reference changed.
    pub fn apply(self, provider: &mut Provider, at: DateTime<Utc>) -> bool {
        let mut key_changed = false;
        if let Some(name) = self.name {
            provider.name = name;
        }
        if let Some(enabled) = self.enabled {
            provider.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            provider.priority = priority;
        }
        if let Some(api_key) = self.api_key {
            key_changed = api_key != provider.config.api_key;
            provider.config.api_key = api_key;
        }
        if let Some(model) = self.model {
            provider.config.model = model;
        }
        if let Some(max_tokens) = self.max_tokens {
            provider.config.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            provider.config.temperature = temperature;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            provider.config.timeout_ms = timeout_ms;
        }
        if let Some(base_url) = self.base_url {
            provider.config.base_url = Some(base_url);
        }
        if let Some(cost) = self.cost_per_1k_tokens {
            provider.config.cost_per_1k_tokens = Some(cost);
        }
        if let Some(limits) = self.rate_limits {
            provider.rate_limits = limits;
        }
        provider.updated_at = at;
        key_changed
    }
}

/// Turn a display name into an id: lower-case ASCII alphanumerics joined by `-`.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "provider".to_string()
    } else {
        slug
    }
}

/// Check a provider config for values that can never work.
///
/// # Errors
///
/// Returns [`AicwError::ConfigInvalid`] naming the first bad field.
pub fn validate_config(provider_type: ProviderType, config: &ProviderConfig) -> Result<()> {
    let invalid = |key: &str, value: String, message: &str| AicwError::ConfigInvalid {
        key: key.to_string(),
        value,
        message: message.to_string(),
    };

    if config.model.trim().is_empty() {
        return Err(invalid("model", config.model.clone(), "must not be empty"));
    }
    if config.max_tokens == 0 {
        return Err(invalid("max_tokens", "0".to_string(), "must be greater than 0"));
    }
    if !(0.0..=2.0).contains(&config.temperature) {
        return Err(invalid(
            "temperature",
            config.temperature.to_string(),
            "must be between 0.0 and 2.0",
        ));
    }
    if config.timeout_ms == 0 {
        return Err(invalid("timeout_ms", "0".to_string(), "must be greater than 0"));
    }
    if provider_type == ProviderType::Custom && config.base_url.is_none() {
        return Err(invalid(
            "base_url",
            String::new(),
            "custom providers need a base URL",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_provider;

    #[test]
    fn provider_type_round_trips_cli_names() {
        for &ty in ProviderType::ALL {
            assert_eq!(ProviderType::from_cli_name(ty.cli_name()).unwrap(), ty);
        }
        assert_eq!(
            ProviderType::from_cli_name("OpenAI").unwrap(),
            ProviderType::OpenAi
        );
        assert!(ProviderType::from_cli_name("gemini").is_err());
    }

    #[test]
    fn running_mean_latency() {
        let mut usage = UsageStats::new();
        let now = Utc::now();
        usage.record(true, 100, None, now);
        usage.record(false, 300, None, now);
        usage.record(true, 200, Some(0.5), now);

        assert_eq!(usage.request_count, 3);
        assert_eq!(usage.success_count, 2);
        assert_eq!(usage.error_count, 1);
        assert!((usage.average_latency_ms - 200.0).abs() < 1e-9);
        assert!((usage.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((usage.error_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert!((usage.estimated_cost - 0.5).abs() < 1e-9);
        assert_eq!(usage.last_used, Some(now));
    }

    #[test]
    fn fresh_stats_have_full_success_rate() {
        let usage = UsageStats::new();
        assert!((usage.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(usage.error_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn routing_order_prefers_priority_then_success_rate() {
        let mut a = make_test_provider("a", 5);
        let mut b = make_test_provider("b", 5);
        let c = make_test_provider("c", 9);
        a.usage.success_rate = 0.5;
        b.usage.success_rate = 0.9;

        let mut all = vec![a, b, c];
        all.sort_by(Provider::routing_cmp);
        let ids: Vec<_> = all.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }

    #[test]
    fn routing_order_breaks_full_ties_by_id() {
        let ids = ["gamma", "alpha", "beta"];
        for rotation in 0..ids.len() {
            let mut all: Vec<Provider> = ids
                .iter()
                .cycle()
                .skip(rotation)
                .take(ids.len())
                .map(|id| make_test_provider(id, 3))
                .collect();
            all.sort_by(Provider::routing_cmp);
            let sorted: Vec<_> = all.iter().map(|p| p.id.as_str()).collect();
            assert_eq!(sorted, ["alpha", "beta", "gamma"]);
        }
    }

    #[test]
    fn listing_order_breaks_ties_by_name() {
        let mut zeta = make_test_provider("z", 1);
        zeta.name = "Zeta".to_string();
        let mut alpha = make_test_provider("y", 1);
        alpha.name = "Alpha".to_string();

        let mut all = vec![zeta, alpha];
        all.sort_by(Provider::listing_cmp);
        assert_eq!(all[0].name, "Alpha");
    }

    #[test]
    fn update_reports_key_change() {
        let mut provider = make_test_provider("p", 1);
        let changed = ProviderUpdate {
            priority: Some(3),
            ..Default::default()
        }
        .apply(&mut provider, Utc::now());
        assert!(!changed);
        assert_eq!(provider.priority, 3);

        let changed = ProviderUpdate {
            api_key: Some(ApiKeyRef::env("OTHER_KEY")),
            ..Default::default()
        }
        .apply(&mut provider, Utc::now());
        assert!(changed);
    }

    #[test]
    fn slugify_names() {
        assert_eq!(slugify("OpenAI GPT-4"), "openai-gpt-4");
        assert_eq!(slugify("  Anthropic  Claude! "), "anthropic-claude");
        assert_eq!(slugify("!!!"), "provider");
    }

    #[test]
    fn custom_providers_need_base_url() {
        let config = ProviderConfig::for_type(ProviderType::Custom, ApiKeyRef::env("K"));
        assert!(validate_config(ProviderType::Custom, &config).is_err());

        let config = ProviderConfig::for_type(ProviderType::OpenAi, ApiKeyRef::env("K"));
        assert!(validate_config(ProviderType::OpenAi, &config).is_ok());
    }

    #[test]
    fn cost_estimate_uses_rate() {
        let mut config = ProviderConfig::for_type(ProviderType::OpenAi, ApiKeyRef::env("K"));
        assert_eq!(config.estimate_cost(4000), None);
        config.cost_per_1k_tokens = Some(2.0);
        let cost = config.estimate_cost(4000).unwrap();
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn base_url_falls_back_and_trims() {
        let mut provider = make_test_provider("p", 1);
        provider.config.base_url = None;
        assert_eq!(provider.base_url(), Some("https://api.openai.com"));
        provider.config.base_url = Some("http://localhost:9000/".to_string());
        assert_eq!(provider.base_url(), Some("http://localhost:9000"));
    }
}
