pub mod merge;
pub mod orchestrator;
pub mod types;

pub use merge::{merge_fragments, MergedBatch};
pub use orchestrator::StageB;
pub use types::{ChannelQueues, Outcome};
