//! LLM integration (OpenAI-compatible API)
//!
//! Covers the two upstream calls a request makes: embedding the query text
//! and streaming the chat completion. Clients are constructed per request
//! from the resolved credential; no connection state is shared across
//! requests.

pub mod client;
pub mod gateway;
pub mod streaming;
pub mod types;

pub use client::LlmClient;
pub use gateway::{AnswerStream, ModelGateway, OpenAiGateway};
pub use types::ReasoningEffort;
