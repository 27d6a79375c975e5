//! Model gateway: the dependency-injection boundary for upstream calls
//!
//! The pipeline talks to the embedding and completion services only through
//! this trait, keyed by the per-request credential. Production uses
//! [`OpenAiGateway`]; tests substitute call-counting doubles.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::llm::LlmClient;

/// Lazy, finite, non-restartable sequence of answer fragments
///
/// Fragments arrive in upstream emission order. Dropping the stream cancels
/// the upstream call.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Upstream model calls a request can make
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Embed a query text with the ingestion-time embedding model
    async fn embed_query(&self, api_key: &str, text: &str) -> Result<Vec<f32>>;

    /// Stream a completion for the rendered prompt
    ///
    /// Fails synchronously when the call dies before the first fragment.
    async fn stream_completion(&self, api_key: &str, prompt: &str) -> Result<AnswerStream>;
}

/// Gateway backed by an OpenAI-compatible API
///
/// A fresh [`LlmClient`] is constructed per call from the resolved
/// credential; no request-level state is shared.
#[derive(Debug, Clone)]
pub struct OpenAiGateway {
    config: LlmConfig,
}

impl OpenAiGateway {
    /// Create a gateway with the given LLM configuration
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn embed_query(&self, api_key: &str, text: &str) -> Result<Vec<f32>> {
        let client = LlmClient::new(self.config.clone(), api_key)?;
        client.embed_query(text).await
    }

    async fn stream_completion(&self, api_key: &str, prompt: &str) -> Result<AnswerStream> {
        let client = LlmClient::new(self.config.clone(), api_key)?;
        client.stream_completion(prompt).await
    }
}
