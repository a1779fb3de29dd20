use batchline_core::types::{Channel, Conversation, ConversationStatus};

use crate::error::{Result, RuleError};

/// Run the three ordered rules against a freshly hydrated conversation.
/// Runs only after the full conversation is loaded (SPEC_FULL.md §4.4).
pub fn validate_rules(conversation: &Conversation, channel: Channel) -> Result<()> {
    if conversation.project_status != "active" {
        return Err(RuleError::ProjectInactive);
    }
    if !conversation.allowed_channels.contains(&channel) {
        return Err(RuleError::ChannelNotAllowed);
    }
    if conversation.conversation_status == ConversationStatus::ProcessingReply {
        return Err(RuleError::ConversationLocked);
    }
    Ok(())
}

/// Where an inbound fragment should be routed once the rules pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Full context, zero delay, bypasses AI/batching entirely.
    Handoff,
    /// Minimal trigger, delay `W`, the normal batching path.
    Batch,
}

/// `auto_queue_reply_message` true, or the recipient identifier appears in
/// the channel-specific auto-queue list, sends straight to the handoff
/// queue; everything else takes the normal batch path.
pub fn decide_route(conversation: &Conversation, channel: Channel, recipient_identifier: &str) -> Route {
    if conversation.auto_queue_reply_message {
        return Route::Handoff;
    }

    let auto_queue_list = match channel {
        Channel::Email => &conversation.auto_queue_reply_message_from_email,
        Channel::Whatsapp | Channel::Sms => &conversation.auto_queue_reply_message_from_number,
    };

    if auto_queue_list.iter().any(|id| id == recipient_identifier) {
        return Route::Handoff;
    }

    Route::Batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline_core::types::{AiConfigRef, ChannelConfig};

    fn base_conversation() -> Conversation {
        Conversation {
            primary_channel: "+10000".into(),
            conversation_id: "conv_1".into(),
            project_status: "active".into(),
            allowed_channels: vec![Channel::Whatsapp],
            channel_config: ChannelConfig { credentials_ref: "ref".into(), company_number: "+20000".into() },
            ai_config: AiConfigRef { api_key_ref: "ai-ref".into(), assistant_id_replies: "asst".into() },
            thread_id: None,
            messages: vec![],
            conversation_status: ConversationStatus::Active,
            task_complete: false,
            hand_off_to_human: false,
            hand_off_to_human_reason: None,
            auto_queue_reply_message: false,
            auto_queue_reply_message_from_number: vec![],
            auto_queue_reply_message_from_email: vec![],
            initial_processing_time_ms: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn inactive_project_is_rejected_first() {
        let mut conv = base_conversation();
        conv.project_status = "inactive".into();
        conv.allowed_channels = vec![];
        assert_eq!(
            validate_rules(&conv, Channel::Whatsapp).unwrap_err(),
            RuleError::ProjectInactive
        );
    }

    #[test]
    fn disallowed_channel_is_rejected() {
        let conv = base_conversation();
        assert_eq!(
            validate_rules(&conv, Channel::Sms).unwrap_err(),
            RuleError::ChannelNotAllowed
        );
    }

    #[test]
    fn processing_reply_locks_the_conversation() {
        let mut conv = base_conversation();
        conv.conversation_status = ConversationStatus::ProcessingReply;
        assert_eq!(
            validate_rules(&conv, Channel::Whatsapp).unwrap_err(),
            RuleError::ConversationLocked
        );
    }

    #[test]
    fn default_route_is_batch() {
        let conv = base_conversation();
        assert_eq!(decide_route(&conv, Channel::Whatsapp, "+30000"), Route::Batch);
    }

    #[test]
    fn auto_queue_flag_forces_handoff() {
        let mut conv = base_conversation();
        conv.auto_queue_reply_message = true;
        assert_eq!(decide_route(&conv, Channel::Whatsapp, "+30000"), Route::Handoff);
    }

    #[test]
    fn auto_queue_list_match_forces_handoff() {
        let mut conv = base_conversation();
        conv.auto_queue_reply_message_from_number = vec!["+30000".into()];
        assert_eq!(decide_route(&conv, Channel::Whatsapp, "+30000"), Route::Handoff);
    }
}
