use thiserror::Error;

/// Errors surfaced by the secret fetcher (C3).
///
/// Mirrors the `SECRET_*` status constants in the original's
/// `secrets_manager_service.get_secret`: `ResourceNotFoundException` ->
/// `NotFound`, `InternalServiceError` -> `Transient`, everything else
/// (access denied, decryption failure, malformed payload) -> `Permanent`.
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("no secret for reference {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("secrets client initialization failed: {0}")]
    Config(String),
}

impl SecretsError {
    pub fn code(&self) -> &'static str {
        match self {
            SecretsError::Transient(_) => "TRANSIENT",
            SecretsError::Permanent(_) => "PERMANENT",
            SecretsError::NotFound(_) => "NOT_FOUND",
            SecretsError::InvalidInput(_) => "INVALID_INPUT",
            SecretsError::Config(_) => "CONFIG",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SecretsError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, SecretsError>;
