//! End-to-end pipeline tests over an in-memory database and a scripted
//! model gateway. The gateway counts its calls so stage-ordering claims
//! (nothing upstream runs after an early failure) are checked directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::StreamExt;

use repochat_core::chat::{ChatMessage, ChatPayload};
use repochat_core::error::{Error, Result};
use repochat_core::llm::{AnswerStream, ModelGateway};
use repochat_core::pipeline::{ChatPipeline, ChatResponse, ResponseBody};
use repochat_core::retrieval::{NamespaceRetriever, SqliteVectorIndex, VectorIndex};
use repochat_core::settings::{Resolver, SqliteRepositoryStore, SqliteSettingsStore};
use repochat_core::storage::Database;

/// Gateway double that returns scripted fragments and counts every call
struct ScriptedGateway {
    embed_calls: AtomicUsize,
    completion_calls: AtomicUsize,
    fragments: Vec<String>,
    /// Error yielded after the scripted fragments, simulating a mid-stream
    /// upstream failure
    fail_mid_stream: bool,
    /// Error returned instead of opening the stream at all
    fail_on_open: Option<u16>,
    last_prompt: std::sync::Mutex<Option<String>>,
}

impl ScriptedGateway {
    fn answering(fragments: &[&str]) -> Self {
        Self {
            embed_calls: AtomicUsize::new(0),
            completion_calls: AtomicUsize::new(0),
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            fail_mid_stream: false,
            fail_on_open: None,
            last_prompt: std::sync::Mutex::new(None),
        }
    }

    fn truncating_after(fragments: &[&str]) -> Self {
        Self {
            fail_mid_stream: true,
            ..Self::answering(fragments)
        }
    }

    fn refusing_with(status: u16) -> Self {
        Self {
            fail_on_open: Some(status),
            ..Self::answering(&[])
        }
    }

    fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    fn completion_calls(&self) -> usize {
        self.completion_calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelGateway for ScriptedGateway {
    async fn embed_query(&self, _api_key: &str, _text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0, 0.0])
    }

    async fn stream_completion(&self, _api_key: &str, prompt: &str) -> Result<AnswerStream> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());

        if let Some(status) = self.fail_on_open {
            return Err(Error::Upstream {
                status,
                message: "upstream refused".to_string(),
            });
        }

        let mut items: Vec<Result<String>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if self.fail_mid_stream {
            items.push(Err(Error::Other("connection reset".to_string())));
            items.push(Ok("after the failure".to_string()));
        }

        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

struct Harness {
    pipeline: ChatPipeline,
    gateway: Arc<ScriptedGateway>,
    index: SqliteVectorIndex,
    settings: SqliteSettingsStore,
    repos: SqliteRepositoryStore,
    _db: Database,
}

async fn harness(gateway: ScriptedGateway) -> Harness {
    let db = Database::open_in_memory().await.unwrap();
    let settings = SqliteSettingsStore::new(db.pool().clone());
    let repos = SqliteRepositoryStore::new(db.pool().clone());
    let index = SqliteVectorIndex::new(db.pool().clone());
    let gateway = Arc::new(gateway);

    let resolver = Resolver::new(Arc::new(settings.clone()), Arc::new(repos.clone()));
    let retriever = NamespaceRetriever::new(
        gateway.clone() as Arc<dyn ModelGateway>,
        Arc::new(index.clone()) as Arc<dyn VectorIndex>,
    );
    let pipeline = ChatPipeline::new(resolver, retriever, gateway.clone());

    Harness {
        pipeline,
        gateway,
        index,
        settings,
        repos,
        _db: db,
    }
}

/// Standard working deployment: one key, one repository
async fn configured_harness(gateway: ScriptedGateway) -> Harness {
    let h = harness(gateway).await;
    h.settings.store_api_key("sk-test").await.unwrap();
    h.repos
        .add_repository("r1", "My Repo", "ns-1")
        .await
        .unwrap();
    h
}

fn ask(question: &str) -> ChatPayload {
    ChatPayload::new(vec![ChatMessage::user(question)], "r1")
}

async fn collect_body(response: ChatResponse) -> String {
    match response.body {
        ResponseBody::Stream(stream) => stream.collect::<Vec<String>>().await.join(""),
        ResponseBody::Error(body) => panic!("Expected stream body, got error: {}", body.error),
    }
}

fn error_body(response: &ChatResponse) -> &repochat_core::pipeline::ErrorBody {
    match &response.body {
        ResponseBody::Error(body) => body,
        ResponseBody::Stream(_) => panic!("Expected error body, got stream"),
    }
}

#[tokio::test]
async fn empty_messages_fail_fast_without_upstream_calls() {
    let h = configured_harness(ScriptedGateway::answering(&["never"])).await;
    let payload = ChatPayload::new(vec![], "r1");

    let response = h.pipeline.respond(&payload).await;

    assert_eq!(response.status, 400);
    assert_eq!(response.content_type(), "application/json");
    let body = error_body(&response);
    assert_eq!(body.details.stage, "received");
    assert_eq!(h.gateway.embed_calls(), 0);
    assert_eq!(h.gateway.completion_calls(), 0);
}

#[tokio::test]
async fn blank_repo_id_is_rejected() {
    let h = configured_harness(ScriptedGateway::answering(&["never"])).await;
    let payload = ChatPayload::new(vec![ChatMessage::user("hi")], "   ");

    let response = h.pipeline.respond(&payload).await;

    assert_eq!(response.status, 400);
    assert_eq!(h.gateway.embed_calls(), 0);
}

#[tokio::test]
async fn missing_credential_blocks_before_retrieval() {
    let h = harness(ScriptedGateway::answering(&["never"])).await;
    h.repos
        .add_repository("r1", "My Repo", "ns-1")
        .await
        .unwrap();

    let response = h.pipeline.respond(&ask("hi")).await;

    assert_eq!(response.status, 412);
    let body = error_body(&response);
    assert_eq!(body.details.stage, "resolved");
    assert!(body.error.contains("API key"));
    assert_eq!(h.gateway.embed_calls(), 0);
    assert_eq!(h.gateway.completion_calls(), 0);
}

#[tokio::test]
async fn unknown_repository_blocks_before_retrieval() {
    let h = harness(ScriptedGateway::answering(&["never"])).await;
    h.settings.store_api_key("sk-test").await.unwrap();

    let payload = ChatPayload::new(vec![ChatMessage::user("hi")], "missing");
    let response = h.pipeline.respond(&payload).await;

    assert_eq!(response.status, 412);
    let body = error_body(&response);
    assert!(body.error.contains("missing"));
    assert_eq!(h.gateway.embed_calls(), 0);
}

#[tokio::test]
async fn happy_path_streams_fragments_in_order() {
    let h = configured_harness(ScriptedGateway::answering(&["Hel", "lo"])).await;

    let response = h.pipeline.respond(&ask("What does X do?")).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), "text/plain; charset=utf-8");
    assert_eq!(collect_body(response).await, "Hello");
    assert_eq!(h.gateway.embed_calls(), 1);
    assert_eq!(h.gateway.completion_calls(), 1);
}

#[tokio::test]
async fn empty_retrieval_still_answers() {
    // No documents indexed at all; the context block is empty but the
    // request proceeds to the model.
    let h = configured_harness(ScriptedGateway::answering(&["I don't know."])).await;

    let response = h.pipeline.respond(&ask("hi")).await;

    assert_eq!(response.status, 200);
    assert_eq!(collect_body(response).await, "I don't know.");
    assert_eq!(h.gateway.completion_calls(), 1);
}

#[tokio::test]
async fn prompt_only_contains_documents_from_the_selected_namespace() {
    let h = configured_harness(ScriptedGateway::answering(&["ok"])).await;
    h.repos
        .add_repository("r2", "Other Repo", "ns-2")
        .await
        .unwrap();

    // ns-2 holds a perfect match for the query embedding; it must still be
    // invisible when asking about r1.
    h.index
        .insert_document("ns-1", "fn in_scope() {}", None, &[0.5, 0.5, 0.0])
        .await
        .unwrap();
    h.index
        .insert_document("ns-2", "fn out_of_scope() {}", None, &[1.0, 0.0, 0.0])
        .await
        .unwrap();

    let response = h.pipeline.respond(&ask("what functions exist?")).await;
    assert_eq!(response.status, 200);

    let prompt = h.gateway.last_prompt().unwrap();
    assert!(prompt.contains("fn in_scope() {}"));
    assert!(!prompt.contains("fn out_of_scope() {}"));
}

#[tokio::test]
async fn prompt_carries_history_and_question() {
    let h = configured_harness(ScriptedGateway::answering(&["ok"])).await;

    let payload = ChatPayload::new(
        vec![
            ChatMessage::user("a"),
            ChatMessage::assistant("b"),
            ChatMessage::user("What changed?"),
        ],
        "r1",
    );
    let response = h.pipeline.respond(&payload).await;
    assert_eq!(response.status, 200);

    let prompt = h.gateway.last_prompt().unwrap();
    assert!(prompt.contains("user: a\nassistant: b"));
    assert!(prompt.contains("Question: What changed?"));
    // The active question is never duplicated into the history block
    assert!(!prompt.contains("user: What changed?"));
}

#[tokio::test]
async fn upstream_refusal_surfaces_its_status() {
    let h = configured_harness(ScriptedGateway::refusing_with(429)).await;

    let response = h.pipeline.respond(&ask("hi")).await;

    assert_eq!(response.status, 429);
    let body = error_body(&response);
    assert_eq!(body.details.stage, "streaming");
    assert_eq!(body.details.status, 429);
    assert_eq!(h.gateway.embed_calls(), 1);
}

#[tokio::test]
async fn mid_stream_failure_truncates_but_keeps_sent_output() {
    let h = configured_harness(ScriptedGateway::truncating_after(&["partial answer"])).await;

    let response = h.pipeline.respond(&ask("hi")).await;

    // The transport already committed to success; the failure can only
    // shorten the body.
    assert_eq!(response.status, 200);
    assert_eq!(collect_body(response).await, "partial answer");
}

#[tokio::test]
async fn answer_surfaces_mid_stream_errors_to_direct_callers() {
    let h = configured_harness(ScriptedGateway::truncating_after(&["partial"])).await;

    let mut stream = h.pipeline.answer(&ask("hi")).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
    assert!(stream.next().await.unwrap().is_err());
}
