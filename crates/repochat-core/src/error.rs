//! Error types for repochat

use thiserror::Error;

/// Result type alias using repochat's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Repochat error types
///
/// Every failure a request can hit passes through this enum exactly once
/// before it becomes a response body; callers never see raw sqlx/reqwest
/// errors.
#[derive(Error, Debug)]
pub enum Error {
    // Request validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Preconditions
    #[error("No API key is stored. Run `repochat set-key <key>` first.")]
    MissingCredential,

    #[error("Repository '{0}' is not registered. Run `repochat repos list` to see known repositories.")]
    RepositoryNotFound(String),

    // Upstream calls
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Completion request failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Local infrastructure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP-style status code this error surfaces with
    ///
    /// Upstream failures keep whatever status the upstream call produced;
    /// everything without an explicit status defaults to a generic 500.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::MissingCredential | Self::RepositoryNotFound(_) => 412,
            Self::Upstream { status, .. } => *status,
            Self::EmbeddingFailed(_)
            | Self::Network(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Other(_) => 500,
        }
    }

    /// True when the caller could fix the request and try again
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }
}
