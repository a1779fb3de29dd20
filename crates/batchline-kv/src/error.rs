use thiserror::Error;

/// Errors surfaced by the key-value access layer.
///
/// Vendor-specific failures (here, `rusqlite::Error`) are classified at this
/// boundary so every caller above sees a domain code, never a SQLite detail.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unclassified database error: {0}")]
    Other(String),
}

impl KvError {
    pub fn code(&self) -> &'static str {
        match self {
            KvError::Transient(_) => "TRANSIENT",
            KvError::Config(_) => "CONFIG",
            KvError::Validation(_) => "VALIDATION",
            KvError::Other(_) => "OTHER",
        }
    }
}

/// Classify a raw `rusqlite::Error` into the domain taxonomy.
///
/// SQLite has no distinct "access denied"/"missing index" exception family
/// the way DynamoDB does; busy/locked conditions are the transient analogue
/// (another connection holds the write lock), schema errors are CONFIG
/// (the table/column the caller expects is missing — an operator mistake,
/// not a request problem), and constraint violations on caller-supplied
/// keys are VALIDATION.
pub fn classify(err: rusqlite::Error) -> KvError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                KvError::Transient(err.to_string())
            }
            rusqlite::ErrorCode::ConstraintViolation => KvError::Validation(err.to_string()),
            _ => KvError::Other(err.to_string()),
        },
        rusqlite::Error::SqliteSingleThreadedMode => KvError::Config(err.to_string()),
        rusqlite::Error::InvalidColumnName(_) | rusqlite::Error::InvalidColumnType(..) => {
            KvError::Config(err.to_string())
        }
        _ => KvError::Other(err.to_string()),
    }
}

pub type Result<T> = std::result::Result<T, KvError>;
