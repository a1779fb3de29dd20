use thiserror::Error;

/// Errors surfaced by the webhook parser & authenticator (C4).
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unknown channel for path {0}")]
    UnknownChannel(String),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Missing signature header counts as invalid, per SPEC_FULL.md §4.3.
    #[error("signature verification failed")]
    InvalidSignature,
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::UnknownChannel(_) => "PERMANENT",
            WebhookError::MalformedBody(_) => "PERMANENT",
            WebhookError::MissingField(_) => "PERMANENT",
            WebhookError::InvalidSignature => "INVALID_SIGNATURE",
        }
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;
