//! OpenAI chat completions transport.
//!
//! Also serves custom OpenAI-compatible endpoints (same paths, same auth).

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::http::{ensure_success, map_send_error};
use crate::core::provider::Provider;
use crate::error::{AicwError, Result};

const CHAT_PATH: &str = "/v1/chat/completions";
const MODELS_PATH: &str = "/v1/models";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

fn endpoint(provider: &Provider, path: &str) -> Result<String> {
    provider
        .base_url()
        .map(|base| format!("{base}{path}"))
        .ok_or_else(|| AicwError::Config(format!("provider {} has no base URL", provider.id)))
}

/// Run one chat completion and return the first choice's text.
///
/// # Errors
///
/// Returns a network, timeout, API or parse error.
pub async fn complete(
    client: &Client,
    provider: &Provider,
    system: &str,
    prompt: &str,
) -> Result<String> {
    let api_key = provider.config.api_key.resolve(&provider.id)?;
    let url = endpoint(provider, CHAT_PATH)?;
    let timeout = provider.config.timeout();

    let request = ChatRequest {
        model: &provider.config.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
        temperature: provider.config.temperature,
        max_tokens: provider.config.max_tokens,
    };

    let response = client
        .post(&url)
        .bearer_auth(&api_key)
        .timeout(timeout)
        .json(&request)
        .send()
        .await
        .map_err(|e| map_send_error(&provider.id, timeout, &e))?;
    let response = ensure_success(&provider.id, response).await?;

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| AicwError::ParseResponse(e.to_string()))?;

    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| AicwError::ParseResponse("no content in OpenAI response".to_string()))
}

/// List models; any success means the key and endpoint work.
///
/// # Errors
///
/// Returns a network, timeout or API error.
pub async fn probe(client: &Client, provider: &Provider) -> Result<()> {
    let api_key = provider.config.api_key.resolve(&provider.id)?;
    let url = endpoint(provider, MODELS_PATH)?;
    let timeout = provider.config.timeout();

    let response = client
        .get(&url)
        .bearer_auth(&api_key)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_send_error(&provider.id, timeout, &e))?;
    ensure_success(&provider.id, response).await?;
    Ok(())
}
