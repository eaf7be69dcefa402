//! Custom error types for docsync

use thiserror::Error;

/// Main error type for docsync operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// The backing table/relation does not exist (pre-migration environment)
    #[error("Missing relation: {0}")]
    MissingRelation(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the datastore reported that a table/relation does not exist
    pub fn is_missing_relation(&self) -> bool {
        matches!(self, Error::MissingRelation(_))
    }

    /// Errors worth retrying at the datastore RPC level
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ) || is_busy(err),
            Error::VectorStore(_) => true,
            _ => false,
        }
    }
}

/// SQLite "database is locked"/"busy" errors clear up on their own
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_lowercase();
            message.contains("database is locked") || message.contains("busy")
        }
        _ => false,
    }
}

/// Detect "relation does not exist" across the backends we talk to:
/// SQLite reports `no such table`, Postgres uses SQLSTATE 42P01.
pub fn is_missing_relation_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            if db.code().as_deref() == Some("42P01") {
                return true;
            }
            let message = db.message().to_lowercase();
            message.contains("no such table")
                || (message.contains("relation") && message.contains("does not exist"))
        }
        _ => false,
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if is_missing_relation_error(&err) {
            let message = match &err {
                sqlx::Error::Database(db) => db.message().to_string(),
                other => other.to_string(),
            };
            Error::MissingRelation(message)
        } else {
            Error::Database(err)
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::VectorStore(err.to_string())
    }
}

/// Result type alias for docsync
pub type Result<T> = std::result::Result<T, Error>;
