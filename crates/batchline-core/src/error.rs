use thiserror::Error;

/// Domain-level error kind shared by every component boundary.
///
/// Upstream callers match on `.code()` rather than inspecting vendor
/// exceptions, so a dependency swap (e.g. a different queue broker) never
/// leaks through the classification.
#[derive(Debug, Error)]
pub enum BatchlineError {
    #[error("transient dependency failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("lock contention: {0}")]
    LockContention(String),

    #[error("lock lost during commit: {0}")]
    LockLost(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl BatchlineError {
    /// Short code matching the taxonomy in SPEC_FULL.md §7.
    pub fn code(&self) -> &'static str {
        match self {
            BatchlineError::Transient(_) => "TRANSIENT",
            BatchlineError::Permanent(_) => "PERMANENT",
            BatchlineError::LockContention(_) => "LOCK_CONTENTION",
            BatchlineError::LockLost(_) => "LOCK_LOST",
            BatchlineError::Config(_) => "CONFIG",
            BatchlineError::Validation(_) => "VALIDATION",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BatchlineError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, BatchlineError>;
