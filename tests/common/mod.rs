//! Shared helpers for integration tests.
//!
//! - `logger`: structured per-test logging
//! - fixture writers for article files, provider stores and config files
#![allow(dead_code)]

pub mod logger;

use std::path::{Path, PathBuf};

use aicw::core::models::Article;
use aicw::core::provider::{Provider, ProviderConfig, ProviderType};
use aicw::core::secrets::ApiKeyRef;
use aicw::make_test_articles;
use aicw::storage::providers::ProviderStore;

/// Environment variable the mock providers read their key from.
pub const MOCK_KEY_ENV: &str = "AICW_IT_MOCK_KEY";

/// Write `n` generated articles as a JSON array.
pub fn write_articles(dir: &Path, name: &str, n: usize) -> PathBuf {
    write_article_list(dir, name, &make_test_articles(n))
}

pub fn write_article_list(dir: &Path, name: &str, articles: &[Article]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(articles).unwrap()).unwrap();
    path
}

/// Provider of `provider_type` pointed at `base_url`.
pub fn mock_provider(id: &str, provider_type: ProviderType, base_url: &str, priority: i32) -> Provider {
    let mut provider = aicw::make_test_provider(id, priority);
    provider.provider_type = provider_type;
    provider.config = ProviderConfig::for_type(provider_type, ApiKeyRef::env(MOCK_KEY_ENV));
    provider.config.base_url = Some(base_url.to_string());
    provider.config.timeout_ms = 2_000;
    provider.rate_limits = provider_type.default_rate_limits();
    provider
}

/// Write `providers` into a store at `dir/providers.json`.
pub fn write_provider_store(dir: &Path, providers: &[Provider]) -> PathBuf {
    let path = dir.join("providers.json");
    ProviderStore::new(&path).save(providers).unwrap();
    path
}

/// Config file that keeps provider store and event log under `dir`.
pub fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let content = format!(
        "[general]\nprovider_store = {:?}\nevent_log = {:?}\n\n[batch]\ndelay_between_batches_ms = 0\nitem_delay_ms = 0\n\n{extra}",
        dir.join("providers.json"),
        dir.join("events.sqlite"),
    );
    std::fs::write(&path, content).unwrap();
    path
}
