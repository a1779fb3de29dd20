use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use batchline_core::types::{strip_channel_prefix, Channel, TriggerMessage};
use batchline_kv::{CredentialLookup, KvStore, TriggerLockOutcome};
use batchline_queue::QueueHandle;
use batchline_routing::{decide_route, validate_rules, Route};
use batchline_secrets::{parse_provider_credentials, SecretsClient};
use batchline_webhook::{verify_twilio_signature, ParsedRequest};

use crate::types::{AckOutcome, Decision};

/// Per-channel queue routing table (SPEC_FULL.md §6 `queues.*`).
#[derive(Debug, Clone)]
pub struct QueueNames {
    pub whatsapp: String,
    pub sms: String,
    pub email: String,
    pub handoff: String,
}

impl QueueNames {
    fn batch_queue_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Whatsapp => &self.whatsapp,
            Channel::Sms => &self.sms,
            Channel::Email => &self.email,
        }
    }
}

/// The Stage A orchestrator (C6): glues C1-C5 together for the synchronous,
/// webhook-facing path.
pub struct StageA {
    kv: Arc<KvStore>,
    queue: Arc<QueueHandle>,
    secrets: Arc<dyn SecretsClient>,
    queues: QueueNames,
    window_secs: u64,
    ttl_buffer_secs: u64,
    max_receives: u32,
}

impl StageA {
    pub fn new(
        kv: Arc<KvStore>,
        queue: Arc<QueueHandle>,
        secrets: Arc<dyn SecretsClient>,
        queues: QueueNames,
        window_secs: u64,
        ttl_buffer_secs: u64,
        max_receives: u32,
    ) -> Self {
        Self { kv, queue, secrets, queues, window_secs, ttl_buffer_secs, max_receives }
    }

    /// Run the full C6 algorithm for one already-parsed inbound request.
    /// Parsing itself (C4) happens upstream, in the transport adapter, since
    /// its failure modes (missing fields, bad JSON) are channel-specific and
    /// don't need any of C1/C3's collaborators.
    #[instrument(skip(self, parsed), fields(channel = %parsed.channel, message_sid = %parsed.derived_context.message_sid))]
    pub async fn handle_webhook(&self, parsed: ParsedRequest) -> Decision {
        let ctx = &parsed.derived_context;

        let credential = match self.kv.lookup_credential_ref(parsed.channel, &ctx.from_id, &ctx.to_id) {
            Ok(found) => found,
            Err(e) if e.code() == "TRANSIENT" => {
                return Decision::Retry(format!("credential lookup transient error: {e}"))
            }
            Err(e) => {
                warn!("credential lookup failed: {e}");
                return Decision::Ack(AckOutcome::Error { code: e.code(), message: e.to_string() });
            }
        };

        let (credential_ref, conversation_id) = match credential {
            CredentialLookup::Found { credential_ref, conversation_id } => (credential_ref, conversation_id),
            CredentialLookup::NotFound => {
                return Decision::Ack(AckOutcome::Error {
                    code: "NOT_FOUND",
                    message: "no conversation matches this sender/recipient pair".into(),
                })
            }
            CredentialLookup::MissingConfig => {
                return Decision::Ack(AckOutcome::Error {
                    code: "MISSING_CONFIG",
                    message: "conversation has no credentials configured".into(),
                })
            }
        };

        // Signature verification is Twilio's telephony scheme; the email
        // channel carries no provider signature in this spec.
        if parsed.channel != Channel::Email {
            match self.verify_signature(&parsed, &credential_ref).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("signature verification failed");
                    return Decision::Ack(AckOutcome::Error {
                        code: "INVALID_SIGNATURE",
                        message: String::new(),
                    });
                }
                Err(decision) => return decision,
            }
        }

        let primary_channel = strip_channel_prefix(parsed.channel, &ctx.from_id);
        let recipient_identifier = strip_channel_prefix(parsed.channel, &ctx.to_id);

        let conversation = match self.kv.get_conversation(&primary_channel, &conversation_id) {
            Ok(batchline_kv::ConversationLookup::Found(conv)) => conv,
            Ok(batchline_kv::ConversationLookup::NotFound) => {
                return Decision::Ack(AckOutcome::Error {
                    code: "NOT_FOUND",
                    message: "conversation row not found".into(),
                })
            }
            Err(e) if e.code() == "TRANSIENT" => {
                return Decision::Retry(format!("conversation fetch transient error: {e}"))
            }
            Err(e) => {
                return Decision::Ack(AckOutcome::Error { code: e.code(), message: e.to_string() })
            }
        };

        if let Err(rule_err) = validate_rules(&conversation, parsed.channel) {
            if rule_err.code() == "CONVERSATION_LOCKED" {
                return Decision::Ack(AckOutcome::ConversationLocked);
            }
            return Decision::Ack(AckOutcome::Error { code: rule_err.code(), message: rule_err.to_string() });
        }

        let route = decide_route(&conversation, parsed.channel, &recipient_identifier);

        if let Err(e) = self.kv.stage_fragment(
            &conversation_id,
            &ctx.message_sid,
            &primary_channel,
            &ctx.body,
            self.window_secs,
            self.ttl_buffer_secs,
        ) {
            if e.code() == "TRANSIENT" {
                return Decision::Retry(format!("staging write transient error: {e}"));
            }
            return Decision::Ack(AckOutcome::Error { code: e.code(), message: e.to_string() });
        }

        match route {
            Route::Handoff => self.enqueue_handoff(&conversation, &conversation_id, &primary_channel),
            Route::Batch => self.acquire_trigger_and_enqueue(parsed.channel, &conversation_id, &primary_channel),
        }
    }

    /// Fetch the provider secret for this credential ref and verify the
    /// request's signature against it. Returns `Ok(bool)` for a completed
    /// verification, or `Err(decision)` to short-circuit on a transient
    /// secret-fetch failure.
    async fn verify_signature(&self, parsed: &ParsedRequest, credential_ref: &str) -> Result<bool, Decision> {
        let Some(signature) = parsed.signature.as_deref() else {
            return Ok(false);
        };

        let raw_secret = self.secrets.fetch_secret(credential_ref).await.map_err(|e| {
            if e.is_transient() {
                Decision::Retry(format!("secret fetch transient error: {e}"))
            } else {
                Decision::Ack(AckOutcome::Error { code: e.code(), message: e.to_string() })
            }
        })?;

        let creds = parse_provider_credentials(&raw_secret)
            .map_err(|e| Decision::Ack(AckOutcome::Error { code: e.code(), message: e.to_string() }))?;

        Ok(verify_twilio_signature(&parsed.canonical_url, &parsed.body_params, &creds.auth_token, signature))
    }

    fn enqueue_handoff(&self, conversation: &batchline_core::types::Conversation, conversation_id: &str, primary_channel: &str) -> Decision {
        let payload = HandoffPayload {
            conversation_id: conversation_id.to_string(),
            primary_channel: primary_channel.to_string(),
            conversation: conversation.clone(),
        };
        let body = match serde_json::to_string(&payload) {
            Ok(b) => b,
            Err(e) => {
                return Decision::Ack(AckOutcome::Error {
                    code: "OTHER",
                    message: format!("failed to serialize handoff payload: {e}"),
                })
            }
        };

        match self.queue.enqueue(&self.queues.handoff, &body, 0, self.max_receives) {
            Ok(_) => Decision::Ack(AckOutcome::Empty),
            Err(e) => Decision::Retry(format!("handoff enqueue failed: {e}")),
        }
    }

    fn acquire_trigger_and_enqueue(&self, channel: Channel, conversation_id: &str, primary_channel: &str) -> Decision {
        match self.kv.acquire_trigger_lock(conversation_id, self.window_secs, self.ttl_buffer_secs) {
            Ok(TriggerLockOutcome::Acquired) => {
                let trigger = TriggerMessage {
                    conversation_id: conversation_id.to_string(),
                    primary_channel: primary_channel.to_string(),
                };
                let body = match serde_json::to_string(&trigger) {
                    Ok(b) => b,
                    Err(e) => {
                        return Decision::Ack(AckOutcome::Error {
                            code: "OTHER",
                            message: format!("failed to serialize trigger message: {e}"),
                        })
                    }
                };
                let queue = self.queues.batch_queue_for(channel);
                match self.queue.enqueue(queue, &body, self.window_secs, self.max_receives) {
                    Ok(_) => Decision::Ack(AckOutcome::Empty),
                    Err(e) => Decision::Retry(format!("trigger enqueue failed: {e}")),
                }
            }
            // The timer is already scheduled; our fragment will be picked
            // up by the pending run. Nothing more to do.
            Ok(TriggerLockOutcome::Exists) => Decision::Ack(AckOutcome::Empty),
            Err(e) if e.code() == "TRANSIENT" => Decision::Retry(format!("trigger lock transient error: {e}")),
            Err(e) => Decision::Ack(AckOutcome::Error { code: e.code(), message: e.to_string() }),
        }
    }
}

#[derive(Serialize)]
struct HandoffPayload {
    conversation_id: String,
    primary_channel: String,
    conversation: batchline_core::types::Conversation,
}
