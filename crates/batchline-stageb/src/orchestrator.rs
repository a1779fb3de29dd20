use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use batchline_ai::AiClient;
use batchline_core::types::{now_rfc3339, Channel, ConversationStatus, MessageTurn, TurnRole};
use batchline_heartbeat::{Heartbeat, HeartbeatOutcome};
use batchline_kv::{CommitOutcome, ConversationLookup, KvStore, ProcessingLockOutcome};
use batchline_provider::{OutboundMessage, ProviderClient};
use batchline_queue::{Delivery, QueueHandle};
use batchline_secrets::{parse_ai_credentials, parse_provider_credentials, SecretsClient};

use crate::merge::merge_fragments;
use crate::types::{ChannelQueues, Outcome};

/// The Stage B orchestrator (C10): one acquire/merge/call/commit/cleanup
/// cycle per queue delivery.
pub struct StageB {
    kv: Arc<KvStore>,
    queue: Arc<QueueHandle>,
    secrets: Arc<dyn SecretsClient>,
    ai: Arc<dyn AiClient>,
    provider: Arc<dyn ProviderClient>,
    queues: ChannelQueues,
    heartbeat_interval: Duration,
    heartbeat_extension_secs: u64,
}

impl StageB {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<KvStore>,
        queue: Arc<QueueHandle>,
        secrets: Arc<dyn SecretsClient>,
        ai: Arc<dyn AiClient>,
        provider: Arc<dyn ProviderClient>,
        queues: ChannelQueues,
        heartbeat_interval: Duration,
        heartbeat_extension_secs: u64,
    ) -> Self {
        Self { kv, queue, secrets, ai, provider, queues, heartbeat_interval, heartbeat_extension_secs }
    }

    /// Run the full C10 algorithm for one delivered trigger (or handoff)
    /// message. `delivery.queue` identifies the channel it arrived on.
    #[instrument(skip(self, delivery), fields(queue = %delivery.queue, receive_count = delivery.receive_count))]
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Outcome {
        let start = std::time::Instant::now();

        let trigger: batchline_core::types::TriggerMessage = match serde_json::from_str(&delivery.body) {
            Ok(t) => t,
            Err(e) => {
                warn!("malformed trigger message, cannot recover conversation id: {e}");
                return self.ack(delivery).await;
            }
        };

        let Some(channel) = self.queues.channel_for(&delivery.queue) else {
            warn!(queue = %delivery.queue, "delivery arrived on an unrecognized queue");
            return self.ack(delivery).await;
        };

        match self.kv.acquire_processing_lock(&trigger.primary_channel, &trigger.conversation_id) {
            Ok(ProcessingLockOutcome::Exists) => {
                info!("processing lock already held, benign duplicate trigger");
                return self.ack(delivery).await;
            }
            Ok(ProcessingLockOutcome::Acquired) => {}
            Err(e) if e.code() == "TRANSIENT" => {
                return self.retry(format!("processing lock transient error: {e}")).await;
            }
            Err(e) => {
                warn!("processing lock acquisition failed: {e}");
                return self.ack(delivery).await;
            }
        }

        let heartbeat = self.start_heartbeat(delivery.receipt.clone());
        let mut sent_already = false;

        let result = self
            .process_locked(channel, &trigger.primary_channel, &trigger.conversation_id, &mut sent_already, start)
            .await;

        let outcome = self.finish(result, heartbeat, sent_already).await;
        match &outcome {
            Outcome::Ack => self.ack(delivery).await,
            Outcome::Retry(reason) => {
                info!(%reason, "leaving delivery for redelivery");
                Outcome::Retry(reason.clone())
            }
        }
    }

    fn start_heartbeat(&self, receipt: String) -> Heartbeat {
        let queue = self.queue.clone();
        let extension_secs = self.heartbeat_extension_secs;
        Heartbeat::start(self.heartbeat_interval, move || {
            let queue = queue.clone();
            let receipt = receipt.clone();
            async move {
                queue
                    .extend_visibility(&receipt, extension_secs)
                    .map_err(|e| e.to_string())
            }
        })
    }

    /// Steps 4-11 of C10, run while the processing lock is held. Returns the
    /// natural `Outcome` the error classification or commit result implies;
    /// the caller still has to reconcile it against the heartbeat's fate.
    async fn process_locked(
        &self,
        channel: Channel,
        primary_channel: &str,
        conversation_id: &str,
        sent_already: &mut bool,
        start: std::time::Instant,
    ) -> Outcome {
        let fragments = match self.kv.query_staging(conversation_id) {
            Ok(rows) => rows,
            Err(e) => return self.release_and_classify(primary_channel, conversation_id, e.code()),
        };

        if fragments.is_empty() {
            info!("trigger fired with no staged fragments, releasing lock for retry");
            self.release_lock(primary_channel, conversation_id);
            return Outcome::Ack;
        }

        if let Some(bad) = fragments.iter().find(|f| f.primary_channel != primary_channel) {
            error!(sid = %bad.message_sid, "staged fragment's primary_channel does not match the trigger");
            self.release_lock(primary_channel, conversation_id);
            return Outcome::Ack;
        }

        let merged = merge_fragments(fragments);
        let t1 = now_rfc3339();

        let conversation = match self.kv.get_conversation(primary_channel, conversation_id) {
            Ok(ConversationLookup::Found(conv)) => conv,
            Ok(ConversationLookup::NotFound) => {
                error!("conversation row disappeared between staging and commit");
                self.release_lock(primary_channel, conversation_id);
                return Outcome::Ack;
            }
            Err(e) => return self.release_and_classify(primary_channel, conversation_id, e.code()),
        };

        let Some(thread_id) = conversation.thread_id.clone() else {
            error!("conversation has no AI thread_id, cannot process a reply");
            self.release_lock(primary_channel, conversation_id);
            return Outcome::Ack;
        };

        let ai_secret = match self.secrets.fetch_secret(&conversation.ai_config.api_key_ref).await {
            Ok(v) => v,
            Err(e) => {
                self.release_lock(primary_channel, conversation_id);
                return if e.is_transient() {
                    Outcome::Retry(format!("AI secret fetch transient error: {e}"))
                } else {
                    warn!("AI secret fetch failed: {e}");
                    Outcome::Ack
                };
            }
        };
        let ai_creds = match parse_ai_credentials(&ai_secret) {
            Ok(c) => c,
            Err(e) => {
                warn!("malformed AI credentials: {e}");
                self.release_lock(primary_channel, conversation_id);
                return Outcome::Ack;
            }
        };

        let provider_secret = match self.secrets.fetch_secret(&conversation.channel_config.credentials_ref).await {
            Ok(v) => v,
            Err(e) => {
                self.release_lock(primary_channel, conversation_id);
                return if e.is_transient() {
                    Outcome::Retry(format!("provider secret fetch transient error: {e}"))
                } else {
                    warn!("provider secret fetch failed: {e}");
                    Outcome::Ack
                };
            }
        };
        let provider_creds = match parse_provider_credentials(&provider_secret) {
            Ok(c) => c,
            Err(e) => {
                warn!("malformed provider credentials: {e}");
                self.release_lock(primary_channel, conversation_id);
                return Outcome::Ack;
            }
        };

        let reply = match self
            .ai
            .process_reply(&thread_id, &conversation.ai_config.assistant_id_replies, &merged.combined_body, &ai_creds.api_key)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.release_lock(primary_channel, conversation_id);
                return if e.code() == "TRANSIENT" {
                    Outcome::Retry(format!("AI call transient error: {e}"))
                } else {
                    warn!("AI call failed: {e}");
                    Outcome::Ack
                };
            }
        };

        let send_result = self
            .provider
            .send(OutboundMessage {
                channel,
                recipient: primary_channel,
                sender: &conversation.channel_config.company_number,
                body: &reply.content,
                account_sid: &provider_creds.account_sid,
                auth_token: &provider_creds.auth_token,
            })
            .await;

        let receipt = match send_result {
            Ok(r) => {
                *sent_already = true;
                r
            }
            Err(e) => {
                self.release_lock(primary_channel, conversation_id);
                return if e.is_transient() {
                    Outcome::Retry(format!("provider send transient error: {e}"))
                } else {
                    warn!("provider send failed permanently: {e}");
                    Outcome::Ack
                };
            }
        };

        let t2 = now_rfc3339();
        let user_turn = MessageTurn {
            message_id: merged.first_message_sid,
            timestamp: t1,
            role: TurnRole::User,
            content: merged.combined_body,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        };
        let assistant_turn = MessageTurn {
            message_id: receipt.message_sid,
            timestamp: t2,
            role: TurnRole::Assistant,
            content: receipt.body,
            prompt_tokens: Some(reply.prompt_tokens),
            completion_tokens: Some(reply.completion_tokens),
            total_tokens: Some(reply.total_tokens),
        };

        let processing_time_ms = start.elapsed().as_millis() as u64;

        match self.kv.commit_reply(
            primary_channel,
            conversation_id,
            user_turn,
            assistant_turn,
            ConversationStatus::ReplySent,
            Some(processing_time_ms),
            false,
            false,
            None,
            None,
        ) {
            Ok(CommitOutcome::Success) => {
                if let Err(e) = self.kv.delete_staging(conversation_id, &merged.message_sids) {
                    warn!("failed to delete staging rows (TTL will reap them): {e}");
                }
                if let Err(e) = self.kv.delete_trigger_lock(conversation_id) {
                    warn!("failed to delete trigger lock (TTL will reap it): {e}");
                }
                Outcome::Ack
            }
            Ok(CommitOutcome::LockLost) => {
                error!("conditional commit lost the processing lock after a reply was already sent");
                Outcome::Ack
            }
            Err(e) => {
                error!("commit_reply failed after a reply was already sent: {e}");
                Outcome::Ack
            }
        }
    }

    fn release_and_classify(&self, primary_channel: &str, conversation_id: &str, code: &'static str) -> Outcome {
        self.release_lock(primary_channel, conversation_id);
        if code == "TRANSIENT" {
            Outcome::Retry(format!("{code} error reading conversation state"))
        } else {
            Outcome::Ack
        }
    }

    fn release_lock(&self, primary_channel: &str, conversation_id: &str) {
        if let Err(e) = self.kv.release_lock_for_retry(primary_channel, conversation_id) {
            warn!("failed to release processing lock for retry: {e}");
        }
    }

    /// Stop the heartbeat and reconcile its outcome against the natural
    /// result: a heartbeat failure always fails the message (SPEC_FULL.md
    /// §5), *unless* the provider send already happened, in which case the
    /// at-most-once-send guarantee wins and the message is never retried.
    async fn finish(&self, natural: Outcome, heartbeat: Heartbeat, sent_already: bool) -> Outcome {
        let hb_outcome = heartbeat.stop().await;
        if let HeartbeatOutcome::Failed(reason) = hb_outcome {
            if !sent_already {
                return Outcome::Retry(format!("heartbeat lease expired: {reason}"));
            }
            warn!(%reason, "heartbeat failed after the reply was already sent, acking anyway");
        }
        natural
    }

    async fn ack(&self, delivery: &Delivery) -> Outcome {
        if let Err(e) = self.queue.delete(&delivery.receipt) {
            warn!("failed to delete acked delivery, it will be redelivered: {e}");
        }
        Outcome::Ack
    }

    async fn retry(&self, reason: String) -> Outcome {
        Outcome::Retry(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use batchline_ai::{AiError, AiReply};
    use batchline_provider::{ProviderError, SendReceipt};
    use batchline_secrets::SecretsError;
    use rusqlite::{params, Connection};

    struct FakeAi(Result<AiReply, AiError>);

    #[async_trait]
    impl AiClient for FakeAi {
        async fn process_reply(&self, _t: &str, _a: &str, _u: &str, _k: &str) -> batchline_ai::Result<AiReply> {
            match &self.0 {
                Ok(r) => Ok(AiReply {
                    content: r.content.clone(),
                    prompt_tokens: r.prompt_tokens,
                    completion_tokens: r.completion_tokens,
                    total_tokens: r.total_tokens,
                }),
                Err(AiError::Transient(s)) => Err(AiError::Transient(s.clone())),
                Err(AiError::NonTransient(s)) => Err(AiError::NonTransient(s.clone())),
                Err(AiError::InvalidInput(s)) => Err(AiError::InvalidInput(s.clone())),
            }
        }
    }

    struct FakeProvider(Result<SendReceipt, ProviderError>);

    #[async_trait]
    impl ProviderClient for FakeProvider {
        async fn send(&self, _m: OutboundMessage<'_>) -> batchline_provider::Result<SendReceipt> {
            match &self.0 {
                Ok(r) => Ok(SendReceipt { message_sid: r.message_sid.clone(), body: r.body.clone() }),
                Err(ProviderError::Transient(s)) => Err(ProviderError::Transient(s.clone())),
                Err(ProviderError::NonTransient(s)) => Err(ProviderError::NonTransient(s.clone())),
                Err(ProviderError::InvalidInput(s)) => Err(ProviderError::InvalidInput(s.clone())),
            }
        }
    }

    struct FakeSecrets;

    #[async_trait]
    impl SecretsClient for FakeSecrets {
        async fn fetch_secret(&self, secret_ref: &str) -> batchline_secrets::Result<serde_json::Value> {
            match secret_ref {
                "ai-secret" => Ok(serde_json::json!({"ai_api_key": "sk-test"})),
                "provider-secret" => Ok(serde_json::json!({"twilio_account_sid": "AC1", "twilio_auth_token": "tok"})),
                other => Err(SecretsError::NotFound(other.to_string())),
            }
        }
    }

    /// Build a `KvStore` with one active conversation row already present.
    /// Inserted on the raw connection before `KvStore::new` takes ownership
    /// of it (whose own `init_db` call is idempotent via `IF NOT EXISTS`),
    /// since `KvStore` exposes no "create conversation" operation — that row
    /// is created by an out-of-scope ingress per SPEC_FULL.md §3 E1.
    fn store_with_conversation(primary_channel: &str, conversation_id: &str) -> Arc<KvStore> {
        let conn = Connection::open_in_memory().unwrap();
        batchline_kv::db::init_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO conversations
               (primary_channel, conversation_id, project_status, allowed_channels,
                channel_config, ai_config, thread_id, messages, conversation_status,
                created_at, updated_at)
             VALUES (?1, ?2, 'active', '[\"whatsapp\"]',
                     '{\"credentials_ref\":\"provider-secret\",\"company_number\":\"+10000\"}',
                     '{\"api_key_ref\":\"ai-secret\",\"assistant_id_replies\":\"asst_1\"}',
                     'thread_1', '[]', 'active',
                     '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            params![primary_channel, conversation_id],
        )
        .unwrap();
        Arc::new(KvStore::new(conn).unwrap())
    }

    fn stageb_with(kv: Arc<KvStore>, ai: Result<AiReply, AiError>, provider: Result<SendReceipt, ProviderError>) -> StageB {
        let queue = Arc::new(QueueHandle::new(Connection::open_in_memory().unwrap()).unwrap());
        let queues = ChannelQueues { whatsapp: "whatsapp".into(), sms: "sms".into(), email: "email".into() };
        StageB::new(
            kv,
            queue,
            Arc::new(FakeSecrets),
            Arc::new(FakeAi(ai)),
            Arc::new(FakeProvider(provider)),
            queues,
            Duration::from_secs(600),
            600,
        )
    }

    fn delivery(queue: &str, body: serde_json::Value) -> Delivery {
        Delivery {
            id: "m1".into(),
            queue: queue.into(),
            body: body.to_string(),
            receipt: "r1".into(),
            receive_count: 1,
        }
    }

    #[tokio::test]
    async fn happy_path_merges_stages_and_commits_exactly_two_turns() {
        let kv = store_with_conversation("+20000", "conv_1");
        kv.stage_fragment("conv_1", "SM1", "+20000", "Hello", 10, 60).unwrap();
        kv.stage_fragment("conv_1", "SM2", "+20000", "there", 10, 60).unwrap();

        let stageb = stageb_with(
            kv.clone(),
            Ok(AiReply { content: "Hi there!".into(), prompt_tokens: 5, completion_tokens: 3, total_tokens: 8 }),
            Ok(SendReceipt { message_sid: "SM_OUT".into(), body: "Hi there!".into() }),
        );

        let d = delivery("whatsapp", serde_json::json!({"conversation_id": "conv_1", "primary_channel": "+20000"}));
        let outcome = stageb.handle_delivery(&d).await;
        assert!(matches!(outcome, Outcome::Ack));

        let batchline_kv::ConversationLookup::Found(conv) = kv.get_conversation("+20000", "conv_1").unwrap() else {
            panic!("conversation should still exist");
        };
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].content, "Hello\nthere");
        assert_eq!(conv.messages[1].content, "Hi there!");
        assert_eq!(conv.conversation_status, ConversationStatus::ReplySent);
        assert!(kv.query_staging("conv_1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn benign_duplicate_trigger_is_acked_without_touching_staging() {
        let kv = store_with_conversation("+20000", "conv_1");
        kv.stage_fragment("conv_1", "SM1", "+20000", "Hello", 10, 60).unwrap();
        kv.acquire_processing_lock("+20000", "conv_1").unwrap();

        let stageb = stageb_with(
            kv.clone(),
            Ok(AiReply { content: "unused".into(), prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 }),
            Ok(SendReceipt { message_sid: "unused".into(), body: "unused".into() }),
        );

        // A second trigger arrives while the first run is still in flight.
        let d = delivery("whatsapp", serde_json::json!({"conversation_id": "conv_1", "primary_channel": "+20000"}));
        let outcome = stageb.handle_delivery(&d).await;
        assert!(matches!(outcome, Outcome::Ack));
        assert_eq!(kv.query_staging("conv_1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ai_transient_error_is_retried_and_releases_the_lock() {
        let kv = store_with_conversation("+20000", "conv_1");
        kv.stage_fragment("conv_1", "SM1", "+20000", "Hello", 10, 60).unwrap();

        let stageb = stageb_with(
            kv.clone(),
            Err(AiError::Transient("rate limited".into())),
            Ok(SendReceipt { message_sid: "unused".into(), body: "unused".into() }),
        );

        let d = delivery("whatsapp", serde_json::json!({"conversation_id": "conv_1", "primary_channel": "+20000"}));
        let outcome = stageb.handle_delivery(&d).await;
        assert!(matches!(outcome, Outcome::Retry(_)));

        let batchline_kv::ConversationLookup::Found(conv) = kv.get_conversation("+20000", "conv_1").unwrap() else {
            panic!("conversation should still exist");
        };
        assert_eq!(conv.conversation_status, ConversationStatus::Retry);
        assert!(conv.messages.is_empty());
    }

    #[tokio::test]
    async fn provider_permanent_error_acks_with_no_history_append() {
        let kv = store_with_conversation("+20000", "conv_1");
        kv.stage_fragment("conv_1", "SM1", "+20000", "Hello", 10, 60).unwrap();

        let stageb = stageb_with(
            kv.clone(),
            Ok(AiReply { content: "reply".into(), prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 }),
            Err(ProviderError::NonTransient("unreachable number".into())),
        );

        let d = delivery("whatsapp", serde_json::json!({"conversation_id": "conv_1", "primary_channel": "+20000"}));
        let outcome = stageb.handle_delivery(&d).await;
        assert!(matches!(outcome, Outcome::Ack));

        let batchline_kv::ConversationLookup::Found(conv) = kv.get_conversation("+20000", "conv_1").unwrap() else {
            panic!("conversation should still exist");
        };
        assert_eq!(conv.conversation_status, ConversationStatus::Retry);
        assert!(conv.messages.is_empty());
        // Staging rows survive this failure path; TTL is the safety net.
        assert_eq!(kv.query_staging("conv_1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_staging_on_trigger_fire_releases_lock_and_acks() {
        let kv = store_with_conversation("+20000", "conv_1");

        let stageb = stageb_with(
            kv.clone(),
            Ok(AiReply { content: "unused".into(), prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 }),
            Ok(SendReceipt { message_sid: "unused".into(), body: "unused".into() }),
        );

        let d = delivery("whatsapp", serde_json::json!({"conversation_id": "conv_1", "primary_channel": "+20000"}));
        let outcome = stageb.handle_delivery(&d).await;
        assert!(matches!(outcome, Outcome::Ack));

        let batchline_kv::ConversationLookup::Found(conv) = kv.get_conversation("+20000", "conv_1").unwrap() else {
            panic!("conversation should still exist");
        };
        assert_eq!(conv.conversation_status, ConversationStatus::Retry);
    }
}
