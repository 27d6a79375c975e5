//! OpenAI-compatible LLM client
//!
//! Async HTTP client for the embeddings and chat-completions endpoints.
//! One client is built per request from the resolved credential; failures
//! are surfaced with the upstream status, never retried here.

use std::time::Duration;

use reqwest::Client as HttpClient;
use tracing::debug;

use crate::chat::ChatMessage;
use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::gateway::AnswerStream;
use super::streaming::{LineBuffer, StreamEvent, parse_sse_line};
use super::types::{ChatRequest, EmbeddingRequest, EmbeddingResponse};

/// OpenAI-compatible LLM client
#[derive(Clone)]
pub struct LlmClient {
    /// HTTP client for making requests
    http_client: HttpClient,
    /// LLM configuration (models, reasoning effort, base URL)
    config: LlmConfig,
    /// API key for authentication
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.config.base_url)
            .field("chat_model", &self.config.chat_model)
            .field("embedding_model", &self.config.embedding_model)
            .finish()
    }
}

impl LlmClient {
    /// Create a new client with the given configuration and API key
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            http_client,
            config,
            api_key: api_key.into(),
        })
    }

    /// Get the configured chat model
    pub fn chat_model(&self) -> &str {
        &self.config.chat_model
    }

    /// Generate an embedding for a single query text
    ///
    /// Must use the same model (and therefore dimension) as ingestion; a
    /// mismatch is an operator error, not handled here.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.config.base_url);
        let request = EmbeddingRequest::new(&self.config.embedding_model, text);

        debug!(model = %request.model, "Sending embedding request");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(Error::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_error(status, response).await);
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFailed(format!("Failed to parse response: {}", e)))?;

        embedding_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::EmbeddingFailed("Empty embedding response".to_string()))
    }

    /// Make a streaming chat completion request
    ///
    /// The assembled prompt is sent as a single user message. If the call
    /// fails before any fragment is produced, the error is returned here
    /// synchronously; once the stream is open, fragments flow in emission
    /// order until the upstream finishes or fails.
    pub async fn stream_completion(&self, prompt: &str) -> Result<AnswerStream> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let request = ChatRequest::new(&self.config.chat_model, vec![ChatMessage::user(prompt)])
            .with_reasoning_effort(self.config.reasoning_effort)
            .with_streaming(true);

        debug!(
            model = %request.model,
            effort = %self.config.reasoning_effort,
            "Sending streaming chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(Error::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_error(status, response).await);
        }

        // Parse SSE lines into text fragments as bytes arrive; dropping the
        // stream drops the response and releases the upstream connection.
        let stream = async_stream::stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut lines = LineBuffer::default();

            use futures_util::StreamExt;

            'outer: while let Some(chunk_result) = bytes_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        for line in lines.push(&bytes) {
                            match parse_sse_line(&line) {
                                Some(StreamEvent::Chunk(chunk)) => {
                                    if let Some(content) = chunk.content()
                                        && !content.is_empty()
                                    {
                                        yield Ok(content.to_string());
                                    }
                                    if chunk.is_done() {
                                        break 'outer;
                                    }
                                }
                                Some(StreamEvent::Done) => break 'outer,
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(Error::Network(e));
                        break;
                    }
                }
            }

            // A final data line arriving without its trailing newline still
            // carries content
            if let Some(line) = lines.flush()
                && let Some(StreamEvent::Chunk(chunk)) = parse_sse_line(&line)
                && let Some(content) = chunk.content()
                && !content.is_empty()
            {
                yield Ok(content.to_string());
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Convert a non-success upstream response into a structured error
async fn upstream_error(status: reqwest::StatusCode, response: reqwest::Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    Error::Upstream {
        status: status.as_u16(),
        message: extract_error_message(&body).unwrap_or(body),
    }
}

/// Pull the human-readable message out of an API error body
fn extract_error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")?
        .get("message")?
        .as_str()
        .map(String::from)
}
