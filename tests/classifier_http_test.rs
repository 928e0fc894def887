//! Provider transports and failover against mock HTTP APIs.
//!
//! Each test starts its own wiremock server standing in for one or both
//! vendors, writes a provider store pointing at it, and drives the registry
//! and classifier through the real `HttpTransport`.

mod common;

use std::sync::{Arc, Once};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aicw::core::classifier::Classifier;
use aicw::core::fallback::FALLBACK_CONFIDENCE;
use aicw::core::health::HealthStatus;
use aicw::core::models::{Location, Severity};
use aicw::core::provider::{Provider, ProviderType};
use aicw::core::registry::{ProviderRegistry, RegistryOptions};
use aicw::error::AicwError;
use aicw::providers::{HttpTransport, ProviderTransport};
use aicw::storage::providers::ProviderStore;
use aicw::{VALID_REPLY, make_test_article};

use common::logger::TestLogger;
use common::{MOCK_KEY_ENV, mock_provider, write_provider_store};

const MOCK_KEY: &str = "sk-mock-0123456789";

#[allow(unsafe_code)]
fn set_mock_key() {
    static SET: Once = Once::new();
    // SAFETY: set once, before any test reads it, and never changed.
    SET.call_once(|| unsafe { std::env::set_var(MOCK_KEY_ENV, MOCK_KEY) });
}

fn openai_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": text } }]
    }))
}

fn anthropic_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "content": [{ "type": "text", "text": text }]
    }))
}

async fn mount_openai_models(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(server)
        .await;
}

fn registry_with(dir: &TempDir, providers: &[Provider]) -> Arc<ProviderRegistry> {
    let store_path = write_provider_store(dir.path(), providers);
    let registry = ProviderRegistry::with_store(
        Arc::new(HttpTransport::new().unwrap()),
        RegistryOptions::default(),
        ProviderStore::new(store_path),
    )
    .unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn openai_reply_is_parsed() {
    let log = TestLogger::new("openai_reply_is_parsed");
    set_mock_key();

    log.phase("setup");
    let server = MockServer::start().await;
    mount_openai_models(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", format!("Bearer {MOCK_KEY}").as_str()))
        .respond_with(openai_reply(VALID_REPLY))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let registry = registry_with(
        &dir,
        &[mock_provider("openai-mock", ProviderType::OpenAi, &server.uri(), 10)],
    );

    log.phase("test");
    let article = make_test_article("a1", "EEOC guidance on AI hiring", "Federal guidance");
    let outcome = Classifier::new(Arc::clone(&registry))
        .classify_detailed(&article)
        .await;

    log.phase("verify");
    assert_eq!(outcome.provider_id.as_deref(), Some("openai-mock"));
    assert_eq!(outcome.result.location, Location::National);
    assert_eq!(outcome.result.severity, Severity::Medium);
    assert_eq!(outcome.attempts.len(), 1);
    let usage = registry.usage_stats("openai-mock").unwrap();
    assert_eq!(usage.success_count, 1);
    log.finish_ok();
}

#[tokio::test]
async fn server_error_fails_over_to_next_provider() {
    let log = TestLogger::new("server_error_fails_over_to_next_provider");
    set_mock_key();

    log.phase("setup");
    let server = MockServer::start().await;
    mount_openai_models(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", MOCK_KEY))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(anthropic_reply(VALID_REPLY))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let registry = registry_with(
        &dir,
        &[
            mock_provider("openai-mock", ProviderType::OpenAi, &server.uri(), 10),
            mock_provider("anthropic-mock", ProviderType::Anthropic, &server.uri(), 5),
        ],
    );

    log.phase("test");
    let article = make_test_article("a2", "Algorithm bias", "A hiring model");
    let outcome = Classifier::new(Arc::clone(&registry))
        .classify_detailed(&article)
        .await;

    log.phase("verify");
    log.with_context(
        common::logger::LogLevel::Debug,
        "attempts",
        &serde_json::to_value(&outcome.attempts).unwrap(),
    );
    assert_eq!(outcome.provider_id.as_deref(), Some("anthropic-mock"));
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].provider_id, "openai-mock");
    assert!(!outcome.attempts[0].success);
    assert!(outcome.attempts[0].error.as_deref().unwrap_or_default().contains("500"));
    assert_eq!(registry.usage_stats("openai-mock").unwrap().error_count, 1);
    log.finish_ok();
}

#[tokio::test]
async fn unusable_replies_end_in_fallback() {
    let log = TestLogger::new("unusable_replies_end_in_fallback");
    set_mock_key();

    let server = MockServer::start().await;
    mount_openai_models(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(openai_reply("I cannot classify this article."))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let registry = registry_with(
        &dir,
        &[mock_provider("openai-mock", ProviderType::OpenAi, &server.uri(), 10)],
    );

    let article = make_test_article("a3", "Lawsuit over AI", "A court in Detroit");
    let outcome = Classifier::new(registry).classify_detailed(&article).await;

    assert!(outcome.used_fallback());
    assert!((outcome.result.confidence_score - FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
    assert_eq!(outcome.result.location, Location::Michigan);
    assert_eq!(outcome.result.severity, Severity::High);
    log.finish_ok();
}

#[tokio::test]
async fn rejected_key_marks_provider_down() {
    let log = TestLogger::new("rejected_key_marks_provider_down");
    set_mock_key();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let registry = registry_with(
        &dir,
        &[mock_provider("openai-mock", ProviderType::OpenAi, &server.uri(), 10)],
    );

    let record = registry.test_provider("openai-mock").await.unwrap();
    assert_eq!(record.status, HealthStatus::Down);
    assert!(record.error_message.unwrap_or_default().contains("401"));
    log.finish_ok();
}

#[tokio::test]
async fn slow_reply_times_out() {
    let log = TestLogger::new("slow_reply_times_out");
    set_mock_key();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(openai_reply(VALID_REPLY).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let mut provider = mock_provider("openai-mock", ProviderType::OpenAi, &server.uri(), 10);
    provider.config.timeout_ms = 200;

    let result = HttpTransport::new()
        .unwrap()
        .complete(&provider, "system", "prompt")
        .await;

    match result {
        Err(AicwError::Timeout { provider, millis }) => {
            assert_eq!(provider, "openai-mock");
            assert_eq!(millis, 200);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    log.finish_ok();
}

#[tokio::test]
async fn missing_key_is_reported_before_any_request() {
    let log = TestLogger::new("missing_key_is_reported_before_any_request");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(openai_reply(VALID_REPLY))
        .expect(0)
        .mount(&server)
        .await;
    let mut provider = mock_provider("openai-mock", ProviderType::OpenAi, &server.uri(), 10);
    provider.config.api_key = aicw::core::secrets::ApiKeyRef::env("AICW_IT_UNSET_KEY");

    let result = HttpTransport::new()
        .unwrap()
        .complete(&provider, "system", "prompt")
        .await;
    assert!(matches!(result, Err(AicwError::SecretMissing { .. })));
    log.finish_ok();
}
