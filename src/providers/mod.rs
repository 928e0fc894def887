//! Provider transports.
//!
//! Each provider type has a submodule that turns a prompt into one HTTP
//! call and the reply into text. [`HttpTransport`] dispatches on
//! [`ProviderType`]; the registry and classifier only see the
//! [`ProviderTransport`] trait, so tests can swap in a scripted fake.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use reqwest::Client;

use crate::core::http;
use crate::core::provider::{Provider, ProviderType};
use crate::error::Result;

/// One round trip to a provider API.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Send `prompt` (with the `system` instruction) and return the reply text.
    async fn complete(&self, provider: &Provider, system: &str, prompt: &str) -> Result<String>;

    /// Cheapest call that proves the provider is reachable and the key works.
    async fn probe(&self, provider: &Provider) -> Result<()>;
}

/// Real transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http::default_client()?,
        })
    }

    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn complete(&self, provider: &Provider, system: &str, prompt: &str) -> Result<String> {
        match provider.provider_type {
            ProviderType::OpenAi | ProviderType::Custom => {
                openai::complete(&self.client, provider, system, prompt).await
            }
            ProviderType::Anthropic => {
                anthropic::complete(&self.client, provider, system, prompt).await
            }
        }
    }

    async fn probe(&self, provider: &Provider) -> Result<()> {
        match provider.provider_type {
            ProviderType::OpenAi | ProviderType::Custom => {
                openai::probe(&self.client, provider).await
            }
            ProviderType::Anthropic => anthropic::probe(&self.client, provider).await,
        }
    }
}
