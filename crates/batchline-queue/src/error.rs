use thiserror::Error;

/// Errors surfaced by the delayed-queue client.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("transient: {0}")]
    Transient(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// `ExtendVisibility`/`Delete` called with a receipt that no longer
    /// matches any row (already deleted, already redelivered, or dead-lettered).
    #[error("no message for receipt {0}")]
    NotFound(String),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Database(_) => "TRANSIENT",
            QueueError::Transient(_) => "TRANSIENT",
            QueueError::Config(_) => "CONFIG",
            QueueError::NotFound(_) => "NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
