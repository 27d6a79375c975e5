//! Namespace-scoped similarity retrieval
//!
//! Every query is restricted to documents tagged with the target
//! repository's namespace. The namespace predicate is part of the index
//! query itself, never applied after ranking, so the top-k window is never
//! starved by documents from other repositories.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::llm::ModelGateway;

/// Number of documents pulled into the prompt context
pub const DEFAULT_TOP_K: usize = 8;

/// A document returned by similarity search
///
/// Transient per request; rank is implicit in ordering (highest relevance
/// first).
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    /// Raw text content of the chunk
    pub content: String,
    /// Where the chunk came from (file path or similar), when known
    pub source: Option<String>,
    /// Cosine similarity against the query embedding
    pub score: f32,
}

/// Similarity-search contract over the vector index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-k similarity search, filtered to a single namespace at the query
    /// level
    async fn similarity_search(
        &self,
        embedding: &[f32],
        namespace: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>>;
}

/// SQLite-backed vector index
///
/// Embeddings are stored as little-endian f32 blobs alongside content; the
/// namespace column carries an index so the per-namespace scan stays cheap.
#[derive(Debug, Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Create a new index over an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a document with its precomputed embedding
    pub async fn insert_document(
        &self,
        namespace: &str,
        content: &str,
        source: Option<&str>,
        embedding: &[f32],
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let embedding_bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();

        sqlx::query(
            r#"
            INSERT INTO documents (id, namespace, content, source, embedding, dimensions, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(namespace)
        .bind(content)
        .bind(source)
        .bind(&embedding_bytes)
        .bind(embedding.len() as i32)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(namespace = %namespace, document_id = %id, "Document indexed");
        Ok(id)
    }

    /// Number of documents indexed under a namespace
    pub async fn count(&self, namespace: &str) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents WHERE namespace = ?")
                .bind(namespace)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn similarity_search(
        &self,
        embedding: &[f32],
        namespace: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        // The namespace filter is part of the query; only this repository's
        // documents are candidates for the top-k window.
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT content, source, embedding FROM documents WHERE namespace = ?",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<RetrievedDocument> = rows
            .into_iter()
            .map(|row| {
                let doc_embedding: Vec<f32> = row
                    .embedding
                    .chunks_exact(4)
                    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();

                RetrievedDocument {
                    score: cosine_similarity(embedding, &doc_embedding),
                    content: row.content,
                    source: row.source,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        debug!(
            namespace = %namespace,
            results = scored.len(),
            "Similarity search complete"
        );
        Ok(scored)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    content: String,
    source: Option<String>,
    embedding: Vec<u8>,
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Retriever that scopes every query to one repository namespace
///
/// Embeds the query with the same model used at ingestion time, then runs a
/// namespace-filtered top-k search. An empty result is a valid empty
/// context, not an error.
#[derive(Clone)]
pub struct NamespaceRetriever {
    gateway: Arc<dyn ModelGateway>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl NamespaceRetriever {
    /// Create a retriever with the default top-k
    pub fn new(gateway: Arc<dyn ModelGateway>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            gateway,
            index,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override the number of documents retrieved
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Retrieve the documents most relevant to `query` within `namespace`
    pub async fn retrieve(
        &self,
        api_key: &str,
        query: &str,
        namespace: &str,
    ) -> Result<Vec<RetrievedDocument>> {
        let embedding = self.gateway.embed_query(api_key, query).await?;
        self.index
            .similarity_search(&embedding, namespace, self.top_k)
            .await
    }
}
