use thiserror::Error;

/// Errors surfaced by the provider send adapter (C9).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("non-transient: {0}")]
    NonTransient(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Transient(_) => "TRANSIENT",
            ProviderError::NonTransient(_) => "NON_TRANSIENT",
            ProviderError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
