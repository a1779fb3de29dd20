pub mod db;
pub mod error;
pub mod results;
pub mod store;

pub use error::{KvError, Result};
pub use results::{
    CommitOutcome, ConversationLookup, CredentialLookup, ProcessingLockOutcome, StagingRows,
    TriggerLockOutcome,
};
pub use store::KvStore;
