//! Error types for the retrieval engine.

use thiserror::Error;

/// Errors raised by the chunk store and retrieval engine.
///
/// Schema and dimension violations are fatal and local: they are raised
/// to the immediate caller and never partially applied. ANN backend
/// unavailability is recoverable — the index manager catches it,
/// downgrades the session to exact search, and logs once. An empty
/// result set is not an error anywhere in this crate.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("ANN backend unavailable")]
    BackendUnavailable,

    #[error("Ingestion error: {0}")]
    Ingest(String),

    #[error("Invalid search parameter: {0}")]
    InvalidParameter(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
