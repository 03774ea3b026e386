use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Query analysis error: {0}")]
    Analysis(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Retrieval error: {0}")]
    Retrieval(String),
    #[error("Generation error: {0}")]
    Generation(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Timeouts and cancellations take the same degrade path as hard failures.
    pub const fn is_timeout_or_cancel(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Reclassifies a failure raised while calling the embedding service.
    pub fn into_embedding(self) -> Self {
        match self {
            err @ (Self::Embedding(_) | Self::Timeout { .. } | Self::Cancelled { .. }) => err,
            other => Self::Embedding(other.to_string()),
        }
    }

    /// Reclassifies a failure raised while calling the generation model.
    pub fn into_generation(self) -> Self {
        match self {
            err @ (Self::Generation(_) | Self::Timeout { .. } | Self::Cancelled { .. }) => err,
            other => Self::Generation(other.to_string()),
        }
    }
}
