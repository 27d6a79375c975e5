//! Request pipeline
//!
//! Composes resolution, retrieval, prompt assembly, and the streaming
//! completion into one linear flow:
//!
//! `Received -> Resolved -> Retrieved -> Assembled -> Streaming`
//!
//! with an error exit from any stage. Every failure is converted exactly
//! once, here, into a structured response; no stage leaks a raw internal
//! error to the caller.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chat::ChatPayload;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{AnswerStream, ModelGateway, OpenAiGateway};
use crate::prompt;
use crate::retrieval::{NamespaceRetriever, SqliteVectorIndex, VectorIndex};
use crate::settings::{
    CredentialStore, EnvCredentialStore, Resolver, SqliteRepositoryStore, SqliteSettingsStore,
};
use crate::storage::Database;

/// Pipeline stage a request is in when something happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Resolved,
    Retrieved,
    Assembled,
    Streaming,
}

impl Stage {
    /// Stable name used in logs and error details
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Resolved => "resolved",
            Stage::Retrieved => "retrieved",
            Stage::Assembled => "assembled",
            Stage::Streaming => "streaming",
        }
    }
}

/// Body of a failure response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Human-readable message; never empty
    pub error: String,
    /// Where and how the request failed
    pub details: ErrorDetails,
}

/// Failure metadata
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    /// Stage the pipeline was in
    pub stage: &'static str,
    /// HTTP-style status surfaced to the caller
    pub status: u16,
}

/// Answer fragments after mid-stream errors have been absorbed
pub type BodyStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Outcome of a request, in transport terms
pub struct ChatResponse {
    /// HTTP-style status code
    pub status: u16,
    /// Stream body on success, JSON error body on failure
    pub body: ResponseBody,
}

/// The two body shapes a response can have
pub enum ResponseBody {
    /// Raw text fragments, concatenated by the consumer in emission order
    Stream(BodyStream),
    /// Structured failure
    Error(ErrorBody),
}

impl ChatResponse {
    fn stream(body: BodyStream) -> Self {
        Self {
            status: 200,
            body: ResponseBody::Stream(body),
        }
    }

    fn failure(stage: Stage, error: &Error) -> Self {
        let status = error.http_status();
        Self {
            status,
            body: ResponseBody::Error(ErrorBody {
                error: error.to_string(),
                details: ErrorDetails {
                    stage: stage.as_str(),
                    status,
                },
            }),
        }
    }

    /// Content type of the body
    pub fn content_type(&self) -> &'static str {
        match self.body {
            ResponseBody::Stream(_) => "text/plain; charset=utf-8",
            ResponseBody::Error(_) => "application/json",
        }
    }

    /// True for the streaming success case
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Orchestrates one question-answering request end to end
///
/// Each request owns its credential lookup, retrieval, and stream; the
/// pipeline itself holds only the injected collaborators.
#[derive(Clone)]
pub struct ChatPipeline {
    resolver: Resolver,
    retriever: NamespaceRetriever,
    gateway: Arc<dyn ModelGateway>,
}

impl ChatPipeline {
    /// Create a pipeline from explicit collaborators
    pub fn new(
        resolver: Resolver,
        retriever: NamespaceRetriever,
        gateway: Arc<dyn ModelGateway>,
    ) -> Self {
        Self {
            resolver,
            retriever,
            gateway,
        }
    }

    /// Wire up the production pipeline over a database and configuration
    ///
    /// The credential lookup prefers `REPOCHAT_API_KEY` / `OPENAI_API_KEY`
    /// from the environment over the stored key.
    pub fn from_database(db: &Database, config: &Config) -> Self {
        let settings: Arc<dyn CredentialStore> = Arc::new(EnvCredentialStore::new(Arc::new(
            SqliteSettingsStore::new(db.pool().clone()),
        )));
        let repositories = Arc::new(SqliteRepositoryStore::new(db.pool().clone()));
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::new(db.pool().clone()));
        let gateway: Arc<dyn ModelGateway> = Arc::new(OpenAiGateway::new(config.llm.clone()));

        let resolver = Resolver::new(settings, repositories);
        let retriever =
            NamespaceRetriever::new(gateway.clone(), index).with_top_k(config.retrieval.top_k);

        Self::new(resolver, retriever, gateway)
    }

    /// Answer a request, returning the raw fragment stream
    ///
    /// Fails before the first fragment when any stage fails; once the
    /// stream is returned, mid-stream errors surface as `Err` items.
    pub async fn answer(&self, payload: &ChatPayload) -> Result<AnswerStream> {
        self.answer_staged(payload).await.map_err(|(_, e)| e)
    }

    /// Answer a request, converted to the transport contract
    ///
    /// Success is a 200 with a plain-text fragment stream; failure is a
    /// JSON body carrying the message, the stage, and the status. A failure
    /// after streaming has begun cannot be represented as an error anymore;
    /// the body stream logs it and ends (truncated output).
    pub async fn respond(&self, payload: &ChatPayload) -> ChatResponse {
        match self.answer_staged(payload).await {
            Ok(stream) => ChatResponse::stream(absorb_stream_errors(stream)),
            Err((stage, error)) => {
                warn!(stage = stage.as_str(), error = %error, "Request failed");
                ChatResponse::failure(stage, &error)
            }
        }
    }

    async fn answer_staged(
        &self,
        payload: &ChatPayload,
    ) -> std::result::Result<AnswerStream, (Stage, Error)> {
        // Received: validate before touching any collaborator
        payload
            .validate()
            .map_err(|e| (Stage::Received, e))?;

        // Resolved: credential + namespace, fetched fresh
        let resolved = self
            .resolver
            .resolve(&payload.selected_repo_id)
            .await
            .map_err(|e| (Stage::Resolved, e))?;

        // Retrieved: the retrieval query is the last message's content,
        // identical to the question the model will see
        let question = payload.question();
        let documents = self
            .retriever
            .retrieve(&resolved.api_key, question, &resolved.repository.namespace)
            .await
            .map_err(|e| (Stage::Retrieved, e))?;
        debug!(
            repo_id = %resolved.repository.id,
            documents = documents.len(),
            "Context retrieved"
        );

        // Assembled: pure rendering, empty context allowed
        let rendered = prompt::assemble(&documents, payload.history(), question);

        // Streaming: a synchronous upstream failure still yields a
        // structured error; after this point fragments flow as they arrive
        self.gateway
            .stream_completion(&resolved.api_key, &rendered)
            .await
            .map_err(|e| (Stage::Streaming, e))
    }
}

/// Pass fragments through; log and terminate on a mid-stream failure
///
/// Already-sent fragments remain valid and the transport has committed to
/// success, so the stream simply ends with no trailing marker.
fn absorb_stream_errors(mut upstream: AnswerStream) -> BodyStream {
    Box::pin(async_stream::stream! {
        use futures_util::StreamExt;

        while let Some(item) = upstream.next().await {
            match item {
                Ok(fragment) => yield fragment,
                Err(e) => {
                    warn!(error = %e, "Completion stream failed mid-answer; output truncated");
                    break;
                }
            }
        }
    })
}
