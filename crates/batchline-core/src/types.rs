use serde::{Deserialize, Serialize};
use std::fmt;

/// Which inbound channel a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Sms => "sms",
            Channel::Email => "email",
        }
    }

    /// The prefix this channel strips from identifiers before any lookup,
    /// e.g. `"whatsapp:+447700900000"` -> `"+447700900000"`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp:",
            Channel::Sms => "sms:",
            Channel::Email => "email:",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(Channel::Whatsapp),
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Strip a channel's `"<channel>:"` prefix from an identifier, if present.
///
/// Applied uniformly to both the user identifier and the company identifier
/// before any secondary-index lookup (see SPEC_FULL.md §9 "Key-stripping").
pub fn strip_channel_prefix(channel: Channel, identifier: &str) -> String {
    identifier
        .strip_prefix(channel.prefix())
        .unwrap_or(identifier)
        .to_string()
}

/// Lifecycle state of the conversation row (E1.conversation_status).
///
/// `ProcessingReply` doubles as the system's sole mutual-exclusion primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    TemplateSent,
    ProcessingReply,
    ReplySent,
    Retry,
    HandoffRequested,
    HandoffActive,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::TemplateSent => "template_sent",
            ConversationStatus::ProcessingReply => "processing_reply",
            ConversationStatus::ReplySent => "reply_sent",
            ConversationStatus::Retry => "retry",
            ConversationStatus::HandoffRequested => "handoff_requested",
            ConversationStatus::HandoffActive => "handoff_active",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "template_sent" => Ok(ConversationStatus::TemplateSent),
            "processing_reply" => Ok(ConversationStatus::ProcessingReply),
            "reply_sent" => Ok(ConversationStatus::ReplySent),
            "retry" => Ok(ConversationStatus::Retry),
            "handoff_requested" => Ok(ConversationStatus::HandoffRequested),
            "handoff_active" => Ok(ConversationStatus::HandoffActive),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

/// Role of the speaker in a single `MessageTurn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One entry appended to `Conversation.messages` — the merged user input
/// or the assistant reply. `messages` is append-only (E1 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTurn {
    pub message_id: String,
    pub timestamp: String,
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// Per-channel credentials and addressing for a conversation (E1.channel_config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub credentials_ref: String,
    pub company_number: String,
}

/// AI assistant wiring for a conversation (E1.ai_config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfigRef {
    pub api_key_ref: String,
    pub assistant_id_replies: String,
}

/// E1: the canonical conversation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub primary_channel: String,
    pub conversation_id: String,
    pub project_status: String,
    pub allowed_channels: Vec<Channel>,
    pub channel_config: ChannelConfig,
    pub ai_config: AiConfigRef,
    pub thread_id: Option<String>,
    pub messages: Vec<MessageTurn>,
    pub conversation_status: ConversationStatus,
    pub task_complete: bool,
    pub hand_off_to_human: bool,
    pub hand_off_to_human_reason: Option<String>,
    pub auto_queue_reply_message: bool,
    pub auto_queue_reply_message_from_number: Vec<String>,
    pub auto_queue_reply_message_from_email: Vec<String>,
    pub initial_processing_time_ms: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
}

/// E2: one inbound fragment staged for a future batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingFragment {
    pub conversation_id: String,
    pub message_sid: String,
    pub primary_channel: String,
    pub body: String,
    pub received_at: String,
    pub expires_at: i64,
}

/// E3: existence alone means "a batch timer is already scheduled".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerLock {
    pub conversation_id: String,
    pub expires_at: i64,
}

/// Minimal trigger message body enqueued to a channel queue (delay `W`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub conversation_id: String,
    pub primary_channel: String,
}

/// Current wall-clock time as RFC3339, the timestamp format used throughout
/// `received_at`/`created_at`/`updated_at`.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Current wall-clock time as a unix timestamp (seconds), used for TTL fields.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
