use batchline_core::types::{Conversation, StagingFragment};

/// Outcome of `LookupCredentialRef`.
#[derive(Debug, Clone)]
pub enum CredentialLookup {
    Found {
        credential_ref: String,
        conversation_id: String,
    },
    NotFound,
    MissingConfig,
}

/// Outcome of `GetConversation`.
#[derive(Debug, Clone)]
pub enum ConversationLookup {
    Found(Box<Conversation>),
    NotFound,
}

/// Outcome of `AcquireTriggerLock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerLockOutcome {
    Acquired,
    Exists,
}

/// Outcome of `AcquireProcessingLock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingLockOutcome {
    Acquired,
    Exists,
}

/// Outcome of `CommitReply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Success,
    LockLost,
}

/// All the staged fragments for one conversation, already in `QueryStaging`'s
/// natural DB order.
pub type StagingRows = Vec<StagingFragment>;
