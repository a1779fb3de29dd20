/// A completed reply from the AI collaborator (C8 success payload).
#[derive(Debug, Clone)]
pub struct AiReply {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Polling parameters for the thread/run/poll algorithm (SPEC_FULL.md §4.7).
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: 1, timeout_secs: 540 }
    }
}
