//! Database migrations
//!
//! Versioned SQLite schema migrations, applied automatically on connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Initial schema
const MIGRATION_V1: &str = r#"
    -- Deployment-wide settings (API credential lives under the 'api_key' key)
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    -- Registered repositories. namespace scopes every retrieval
    CREATE TABLE IF NOT EXISTS repositories (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL UNIQUE,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_repositories_namespace ON repositories(namespace);

    -- Indexed document chunks with their embeddings
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY NOT NULL,
        namespace TEXT NOT NULL,
        content TEXT NOT NULL,
        source TEXT,
        embedding BLOB NOT NULL,
        dimensions INTEGER NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_documents_namespace ON documents(namespace);
"#;

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let applied: Vec<(i32,)> = sqlx::query_as("SELECT version FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;
    let applied: Vec<i32> = applied.into_iter().map(|(v,)| v).collect();

    for version in 1..=CURRENT_VERSION {
        if applied.contains(&version) {
            continue;
        }

        let sql = match version {
            1 => MIGRATION_V1,
            _ => continue,
        };

        let mut tx = pool.begin().await?;
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(version, "Applied database migration");
    }

    Ok(())
}

/// Get the highest applied schema version
pub async fn schema_version(pool: &SqlitePool) -> Result<i32, sqlx::Error> {
    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}
