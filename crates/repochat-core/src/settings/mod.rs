//! Settings and repository resolution
//!
//! Looks up the stored API credential and the target repository record
//! before anything else runs; retrieval and the model call both depend on
//! its outputs (API key, namespace). Read-only and idempotent per request,
//! fetched fresh each call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{Error, Result};

/// Settings key the API credential is stored under
const API_KEY_SETTING: &str = "api_key";

/// Environment variables consulted before the settings table, in order
const API_KEY_ENV_VARS: &[&str] = &["REPOCHAT_API_KEY", "OPENAI_API_KEY"];

/// API key from the process environment, if one is set
///
/// `REPOCHAT_API_KEY` wins over `OPENAI_API_KEY`; blank values are treated
/// as unset.
pub fn env_api_key() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
}

/// A registered repository
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryRecord {
    /// Opaque identifier callers select repositories by
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Namespace that scopes every retrieval for this repository
    pub namespace: String,
    /// When the repository was registered
    pub created_at: DateTime<Utc>,
}

/// Lookup contract for the deployment-wide API credential
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The stored API key, or None when no key has been configured
    async fn stored_api_key(&self) -> Result<Option<String>>;
}

/// Lookup contract for repository records
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Fetch a repository by id
    async fn repository(&self, id: &str) -> Result<Option<RepositoryRecord>>;
}

/// SQLite-backed settings store
#[derive(Debug, Clone)]
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Create a new settings store over an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store (or replace) the API credential
    pub async fn store_api_key(&self, key: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(API_KEY_SETTING)
        .bind(key)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("API key stored");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteSettingsStore {
    async fn stored_api_key(&self) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(API_KEY_SETTING)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }
}

/// Credential store that prefers the process environment
///
/// Checks [`env_api_key`] first and falls back to the wrapped store, so an
/// operator can override (or avoid storing) the credential via
/// `REPOCHAT_API_KEY` / `OPENAI_API_KEY`. Production wiring uses this
/// decorator around the SQLite store.
pub struct EnvCredentialStore {
    fallback: std::sync::Arc<dyn CredentialStore>,
}

impl EnvCredentialStore {
    /// Wrap a store, giving the environment precedence over it
    pub fn new(fallback: std::sync::Arc<dyn CredentialStore>) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn stored_api_key(&self) -> Result<Option<String>> {
        if let Some(key) = env_api_key() {
            return Ok(Some(key));
        }
        self.fallback.stored_api_key().await
    }
}

/// SQLite-backed repository store
#[derive(Debug, Clone)]
pub struct SqliteRepositoryStore {
    pool: SqlitePool,
}

impl SqliteRepositoryStore {
    /// Create a new repository store over an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a repository
    pub async fn add_repository(&self, id: &str, name: &str, namespace: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories (id, name, namespace, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                namespace = excluded.namespace
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(namespace)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(repo_id = %id, namespace = %namespace, "Repository registered");
        Ok(())
    }

    /// List all registered repositories
    pub async fn list_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        let rows: Vec<RepositoryRow> =
            sqlx::query_as("SELECT id, name, namespace, created_at FROM repositories ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(RepositoryRow::into_record).collect())
    }
}

#[async_trait]
impl RepositoryStore for SqliteRepositoryStore {
    async fn repository(&self, id: &str) -> Result<Option<RepositoryRecord>> {
        let row: Option<RepositoryRow> =
            sqlx::query_as("SELECT id, name, namespace, created_at FROM repositories WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(RepositoryRow::into_record))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RepositoryRow {
    id: String,
    name: String,
    namespace: String,
    created_at: String,
}

impl RepositoryRow {
    fn into_record(self) -> RepositoryRecord {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        RepositoryRecord {
            id: self.id,
            name: self.name,
            namespace: self.namespace,
            created_at,
        }
    }
}

/// Output of a successful resolution
#[derive(Debug, Clone)]
pub struct Resolved {
    /// API key used for embedding and completion calls
    pub api_key: String,
    /// The repository the request targets
    pub repository: RepositoryRecord,
}

/// Resolves the credential and repository a request depends on
#[derive(Clone)]
pub struct Resolver {
    credentials: std::sync::Arc<dyn CredentialStore>,
    repositories: std::sync::Arc<dyn RepositoryStore>,
}

impl Resolver {
    /// Create a resolver over the given stores
    pub fn new(
        credentials: std::sync::Arc<dyn CredentialStore>,
        repositories: std::sync::Arc<dyn RepositoryStore>,
    ) -> Self {
        Self {
            credentials,
            repositories,
        }
    }

    /// Resolve the credential and repository for a request
    ///
    /// Fails with `MissingCredential` when no API key is stored and
    /// `RepositoryNotFound` when the id does not resolve; neither is
    /// retried.
    pub async fn resolve(&self, repo_id: &str) -> Result<Resolved> {
        let api_key = self
            .credentials
            .stored_api_key()
            .await?
            .ok_or(Error::MissingCredential)?;

        let repository = self
            .repositories
            .repository(repo_id)
            .await?
            .ok_or_else(|| Error::RepositoryNotFound(repo_id.to_string()))?;

        debug!(repo_id = %repository.id, namespace = %repository.namespace, "Resolved repository");
        Ok(Resolved {
            api_key,
            repository,
        })
    }
}
