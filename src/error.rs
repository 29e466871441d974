//! Error taxonomy shared by every public operation.
//!
//! Each variant maps to a stable snake_case [`Error::kind`] code so the remote tool
//! surface can report structured failures.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The type descriptor cannot be compiled into a table definition.
    #[error("schema error: {0}")]
    Schema(String),

    /// A live column has a different type than the desired schema asks for.
    #[error(
        "migration conflict on {table}.{column}: live type {live}, desired {desired}"
    )]
    MigrationConflict {
        table: String,
        column: String,
        live: String,
        desired: String,
    },

    /// A payload does not match its schema at `path`.
    #[error("validation error at {path}: {message}")]
    Validation { path: String, message: String },

    #[error("record not found: {0}")]
    NotFound(i64),

    #[error("agent not found: {0}")]
    UnknownAgent(String),

    /// A vector does not have the agent's fixed dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema(_) => "schema_error",
            Self::MigrationConflict { .. } => "migration_conflict",
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::Dimension { .. } => "dimension_error",
            Self::InvalidVector(_) => "invalid_vector",
            Self::Embedding(_) => "embedding_error",
            Self::Inference(_) => "inference_error",
            Self::Sqlite(_) => "storage_error",
            Self::Json(_) => "serialization_error",
        }
    }
}
