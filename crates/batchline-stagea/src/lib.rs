pub mod orchestrator;
pub mod types;

pub use orchestrator::{QueueNames, StageA};
pub use types::{AckOutcome, Decision};
