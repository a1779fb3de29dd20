use thiserror::Error;

/// Failures from the routing & rule validator (C5), evaluated in the fixed
/// order SPEC_FULL.md §4.4 lays out.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuleError {
    #[error("project is not active")]
    ProjectInactive,

    #[error("channel is not allowed for this conversation")]
    ChannelNotAllowed,

    #[error("conversation is locked by another worker")]
    ConversationLocked,
}

impl RuleError {
    pub fn code(&self) -> &'static str {
        match self {
            RuleError::ProjectInactive => "PROJECT_INACTIVE",
            RuleError::ChannelNotAllowed => "CHANNEL_NOT_ALLOWED",
            RuleError::ConversationLocked => "CONVERSATION_LOCKED",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
