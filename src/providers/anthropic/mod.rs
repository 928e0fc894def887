//! Anthropic messages transport.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::http::{ensure_success, map_send_error};
use crate::core::provider::Provider;
use crate::error::{AicwError, Result};

const MESSAGES_PATH: &str = "/v1/messages";
const API_VERSION: &str = "2023-06-01";
const PROBE_MAX_TOKENS: u32 = 10;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

async fn send(
    client: &Client,
    provider: &Provider,
    request: &MessagesRequest<'_>,
) -> Result<reqwest::Response> {
    let api_key = provider.config.api_key.resolve(&provider.id)?;
    let base = provider
        .base_url()
        .ok_or_else(|| AicwError::Config(format!("provider {} has no base URL", provider.id)))?;
    let timeout = provider.config.timeout();

    let response = client
        .post(format!("{base}{MESSAGES_PATH}"))
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .timeout(timeout)
        .json(request)
        .send()
        .await
        .map_err(|e| map_send_error(&provider.id, timeout, &e))?;
    ensure_success(&provider.id, response).await
}

/// Send one message and return the concatenated text blocks.
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
    let request = MessagesRequest {
        model: &provider.config.model,
        max_tokens: provider.config.max_tokens,
        temperature: Some(provider.config.temperature),
        system: Some(system),
        messages: vec![Message {
            role: "user",
            content: prompt,
        }],
    };

    let response = send(client, provider, &request).await?;
    let body: MessagesResponse = response
        .json()
        .await
        .map_err(|e| AicwError::ParseResponse(e.to_string()))?;

    let text = body
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(AicwError::ParseResponse(
            "no text content in Anthropic response".to_string(),
        ));
    }
    Ok(text)
}

/// Minimal message; any success means the key and endpoint work.
///
/// # Errors
///
/// Returns a network, timeout or API error.
pub async fn probe(client: &Client, provider: &Provider) -> Result<()> {
    let request = MessagesRequest {
        model: &provider.config.model,
        max_tokens: PROBE_MAX_TOKENS,
        temperature: None,
        system: None,
        messages: vec![Message {
            role: "user",
            content: "ping",
        }],
    };
    send(client, provider, &request).await?;
    Ok(())
}
