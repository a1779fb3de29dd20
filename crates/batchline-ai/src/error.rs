use thiserror::Error;

/// Errors surfaced by the AI collaborator adapter (C8).
///
/// Mirrors `openai_service.py`'s `AI_*` status constants: rate-limit,
/// connection, timeout and 5xx failures are `Transient`; auth, not-found,
/// bad-request, permission, and a terminal run status are `NonTransient`.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("non-transient: {0}")]
    NonTransient(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AiError {
    pub fn code(&self) -> &'static str {
        match self {
            AiError::Transient(_) => "TRANSIENT",
            AiError::NonTransient(_) => "NON_TRANSIENT",
            AiError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, AiError>;
