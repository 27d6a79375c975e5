//! Repochat Core Library
//!
//! This crate answers questions about an indexed source-code repository by
//! retrieving relevant excerpts from a namespace-scoped vector index and
//! streaming a grounded model answer back to the caller. It provides:
//! - Chat payload types and validation
//! - Settings/repository resolution (credential + retrieval namespace)
//! - Namespace-scoped similarity retrieval over SQLite
//! - Prompt assembly (context + history + question)
//! - Streaming completion invocation (OpenAI-compatible SSE)
//! - The request pipeline that composes the above and maps failures to
//!   structured responses

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod settings;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::chat::{ChatMessage, ChatPayload, ChatRole};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{ChatPipeline, ChatResponse};
}
