use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use batchline_core::types::{
    now_rfc3339, AiConfigRef, Channel, ChannelConfig, Conversation, ConversationStatus,
    MessageTurn, StagingFragment,
};

use crate::error::{classify, KvError, Result};
use crate::results::{
    CommitOutcome, ConversationLookup, CredentialLookup, ProcessingLockOutcome, StagingRows,
    TriggerLockOutcome,
};

/// Typed operations over the three tables (E1-E3), all conditional writes
/// expressed as SQLite `INSERT ... ON CONFLICT` / guarded `UPDATE` statements.
///
/// A single connection behind a mutex gives the strongly-consistent reads
/// the spec requires without a connection pool — the same tradeoff
/// `skynet-sessions::SessionManager` makes for a single-node deployment.
pub struct KvStore {
    db: Mutex<Connection>,
}

impl KvStore {
    /// Wrap an already-open connection; initializes the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve a channel-scoped secondary index lookup to a credential
    /// reference + conversation id, stripping the channel prefix from both
    /// identifiers first (see SPEC_FULL.md §9 "Key-stripping").
    #[instrument(skip(self), fields(%channel))]
    pub fn lookup_credential_ref(
        &self,
        channel: Channel,
        from_id: &str,
        to_id: &str,
    ) -> Result<CredentialLookup> {
        let pk_value = batchline_core::types::strip_channel_prefix(channel, to_id);
        let sk_value = batchline_core::types::strip_channel_prefix(channel, from_id);

        let (pk_col, sk_col) = match channel {
            Channel::Whatsapp => ("gsi_company_whatsapp_number", "gsi_recipient_tel"),
            Channel::Sms => ("gsi_company_sms_number", "gsi_recipient_tel"),
            Channel::Email => ("gsi_company_email", "gsi_recipient_email"),
        };

        let sql = format!(
            "SELECT channel_config, conversation_id FROM conversations
             WHERE {pk_col} = ?1 AND {sk_col} = ?2 LIMIT 1"
        );

        let db = self.lock();
        let row: Option<(String, String)> = db
            .query_row(&sql, params![pk_value, sk_value], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .map_err(classify)?;

        let Some((channel_config_json, conversation_id)) = row else {
            return Ok(CredentialLookup::NotFound);
        };

        let channel_config: ChannelConfig = serde_json::from_str(&channel_config_json)
            .map_err(|e| KvError::Other(format!("malformed channel_config: {e}")))?;

        if channel_config.credentials_ref.is_empty() {
            return Ok(CredentialLookup::MissingConfig);
        }

        Ok(CredentialLookup::Found {
            credential_ref: channel_config.credentials_ref,
            conversation_id,
        })
    }

    /// Strongly-consistent fetch of the canonical conversation row.
    #[instrument(skip(self), fields(%conversation_id))]
    pub fn get_conversation(
        &self,
        primary_channel: &str,
        conversation_id: &str,
    ) -> Result<ConversationLookup> {
        let db = self.lock();
        let row = db
            .query_row(
                "SELECT primary_channel, conversation_id, project_status, allowed_channels,
                        channel_config, ai_config, thread_id, messages, conversation_status,
                        task_complete, hand_off_to_human, hand_off_to_human_reason,
                        auto_queue_reply_message, auto_queue_reply_message_from_number,
                        auto_queue_reply_message_from_email, initial_processing_time_ms,
                        created_at, updated_at
                 FROM conversations WHERE primary_channel = ?1 AND conversation_id = ?2",
                params![primary_channel, conversation_id],
                row_to_conversation,
            )
            .optional()
            .map_err(classify)?;

        match row {
            Some(Ok(conv)) => Ok(ConversationLookup::Found(Box::new(conv))),
            Some(Err(e)) => Err(KvError::Other(format!("malformed conversation row: {e}"))),
            None => Ok(ConversationLookup::NotFound),
        }
    }

    /// Unconditional put of one inbound fragment; idempotent on
    /// `(conversation_id, message_sid)`.
    #[instrument(skip(self, body), fields(%conversation_id, %message_sid))]
    pub fn stage_fragment(
        &self,
        conversation_id: &str,
        message_sid: &str,
        primary_channel: &str,
        body: &str,
        window_secs: u64,
        ttl_buffer_secs: u64,
    ) -> Result<()> {
        let received_at = now_rfc3339();
        let expires_at = batchline_core::types::now_unix() + window_secs as i64 + ttl_buffer_secs as i64;

        let db = self.lock();
        db.execute(
            "INSERT INTO staging_fragments
               (conversation_id, message_sid, primary_channel, body, received_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(conversation_id, message_sid) DO UPDATE SET
               primary_channel = excluded.primary_channel,
               body = excluded.body,
               received_at = excluded.received_at,
               expires_at = excluded.expires_at",
            params![conversation_id, message_sid, primary_channel, body, received_at, expires_at],
        )
        .map_err(classify)?;
        Ok(())
    }

    /// `condition: attribute_not_exists(conversation_id)` realized as
    /// `INSERT OR IGNORE` read back by row count.
    #[instrument(skip(self), fields(%conversation_id))]
    pub fn acquire_trigger_lock(
        &self,
        conversation_id: &str,
        window_secs: u64,
        ttl_buffer_secs: u64,
    ) -> Result<TriggerLockOutcome> {
        let expires_at = batchline_core::types::now_unix() + window_secs as i64 + ttl_buffer_secs as i64;

        let db = self.lock();
        let changed = db
            .execute(
                "INSERT OR IGNORE INTO trigger_locks (conversation_id, expires_at) VALUES (?1, ?2)",
                params![conversation_id, expires_at],
            )
            .map_err(classify)?;

        Ok(if changed == 1 {
            TriggerLockOutcome::Acquired
        } else {
            TriggerLockOutcome::Exists
        })
    }

    /// `condition: attribute_not_exists(conversation_status) OR conversation_status <> "processing_reply"`.
    #[instrument(skip(self), fields(%conversation_id))]
    pub fn acquire_processing_lock(
        &self,
        primary_channel: &str,
        conversation_id: &str,
    ) -> Result<ProcessingLockOutcome> {
        let now = now_rfc3339();
        let db = self.lock();
        let changed = db
            .execute(
                "UPDATE conversations SET conversation_status = 'processing_reply', updated_at = ?1
                 WHERE primary_channel = ?2 AND conversation_id = ?3
                   AND conversation_status <> 'processing_reply'",
                params![now, primary_channel, conversation_id],
            )
            .map_err(classify)?;

        Ok(if changed == 1 {
            ProcessingLockOutcome::Acquired
        } else {
            ProcessingLockOutcome::Exists
        })
    }

    /// All fragments staged for a conversation, in arrival order (DB order is
    /// insertion order here; callers still sort by `(received_at, message_sid)`
    /// per the merge contract since `ON CONFLICT DO UPDATE` can reorder rows).
    #[instrument(skip(self), fields(%conversation_id))]
    pub fn query_staging(&self, conversation_id: &str) -> Result<StagingRows> {
        let db = self.lock();
        let mut stmt = db
            .prepare(
                "SELECT conversation_id, message_sid, primary_channel, body, received_at, expires_at
                 FROM staging_fragments WHERE conversation_id = ?1",
            )
            .map_err(classify)?;

        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok(StagingFragment {
                    conversation_id: row.get(0)?,
                    message_sid: row.get(1)?,
                    primary_channel: row.get(2)?,
                    body: row.get(3)?,
                    received_at: row.get(4)?,
                    expires_at: row.get(5)?,
                })
            })
            .map_err(classify)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(classify)?);
        }
        Ok(out)
    }

    /// Appends `[user_turn, assistant_turn]` to `messages` and re-asserts the
    /// processing lock in the same guarded statement (`WHERE conversation_status
    /// = 'processing_reply'`). A zero-row update means the lock was lost.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, user_turn, assistant_turn), fields(%conversation_id, %status))]
    pub fn commit_reply(
        &self,
        primary_channel: &str,
        conversation_id: &str,
        user_turn: MessageTurn,
        assistant_turn: MessageTurn,
        status: ConversationStatus,
        processing_time_ms: Option<u64>,
        task_complete: bool,
        hand_off_to_human: bool,
        hand_off_to_human_reason: Option<&str>,
        thread_id: Option<&str>,
    ) -> Result<CommitOutcome> {
        let db = self.lock();

        let existing_json: Option<String> = db
            .query_row(
                "SELECT messages FROM conversations
                 WHERE primary_channel = ?1 AND conversation_id = ?2 AND conversation_status = 'processing_reply'",
                params![primary_channel, conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;

        let Some(existing_json) = existing_json else {
            return Ok(CommitOutcome::LockLost);
        };

        let mut messages: Vec<MessageTurn> =
            serde_json::from_str(&existing_json).unwrap_or_default();
        messages.push(user_turn);
        messages.push(assistant_turn);
        let messages_json = serde_json::to_string(&messages)
            .map_err(|e| KvError::Other(format!("failed to serialize messages: {e}")))?;

        let now = now_rfc3339();

        let changed = db
            .execute(
                "UPDATE conversations SET
                   messages = ?1,
                   conversation_status = ?2,
                   updated_at = ?3,
                   initial_processing_time_ms = COALESCE(?4, initial_processing_time_ms),
                   task_complete = ?5,
                   hand_off_to_human = ?6,
                   hand_off_to_human_reason = ?7,
                   thread_id = COALESCE(?8, thread_id)
                 WHERE primary_channel = ?9 AND conversation_id = ?10
                   AND conversation_status = 'processing_reply'",
                params![
                    messages_json,
                    status.as_str(),
                    now,
                    processing_time_ms.map(|v| v as i64),
                    task_complete as i64,
                    hand_off_to_human as i64,
                    hand_off_to_human_reason,
                    thread_id,
                    primary_channel,
                    conversation_id,
                ],
            )
            .map_err(classify)?;

        Ok(if changed == 1 {
            CommitOutcome::Success
        } else {
            CommitOutcome::LockLost
        })
    }

    /// Unconditional `conversation_status := "retry"`; used only in error paths.
    #[instrument(skip(self), fields(%conversation_id))]
    pub fn release_lock_for_retry(&self, primary_channel: &str, conversation_id: &str) -> Result<()> {
        let now = now_rfc3339();
        let db = self.lock();
        db.execute(
            "UPDATE conversations SET conversation_status = 'retry', updated_at = ?1
             WHERE primary_channel = ?2 AND conversation_id = ?3",
            params![now, primary_channel, conversation_id],
        )
        .map_err(classify)?;
        Ok(())
    }

    /// Best-effort bulk delete; TTL is the safety net if this fails.
    #[instrument(skip(self), fields(%conversation_id, count = message_sids.len()))]
    pub fn delete_staging(&self, conversation_id: &str, message_sids: &[String]) -> Result<()> {
        if message_sids.is_empty() {
            return Ok(());
        }
        let db = self.lock();
        for sid in message_sids {
            db.execute(
                "DELETE FROM staging_fragments WHERE conversation_id = ?1 AND message_sid = ?2",
                params![conversation_id, sid],
            )
            .map_err(classify)?;
        }
        Ok(())
    }

    /// Unconditional delete; succeeds even if the lock is already absent.
    #[instrument(skip(self), fields(%conversation_id))]
    pub fn delete_trigger_lock(&self, conversation_id: &str) -> Result<()> {
        let db = self.lock();
        db.execute(
            "DELETE FROM trigger_locks WHERE conversation_id = ?1",
            params![conversation_id],
        )
        .map_err(classify)?;
        Ok(())
    }

    /// Drop staging/trigger-lock rows whose TTL has passed. Stands in for
    /// DynamoDB's native TTL sweep; intended to be run periodically by the
    /// worker pool process.
    pub fn reap_expired(&self) -> Result<(usize, usize)> {
        let now = batchline_core::types::now_unix();
        let db = self.lock();
        let staging = db
            .execute("DELETE FROM staging_fragments WHERE expires_at < ?1", params![now])
            .map_err(classify)?;
        let locks = db
            .execute("DELETE FROM trigger_locks WHERE expires_at < ?1", params![now])
            .map_err(classify)?;
        Ok((staging, locks))
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let allowed_channels_json: String = row.get(3)?;
    let channel_config_json: String = row.get(4)?;
    let ai_config_json: String = row.get(5)?;
    let messages_json: String = row.get(7)?;
    let conversation_status_str: String = row.get(8)?;
    let auto_queue_number_json: String = row.get(13)?;
    let auto_queue_email_json: String = row.get(14)?;

    let allowed_channels: Vec<Channel> =
        serde_json::from_str(&allowed_channels_json).unwrap_or_default();
    let channel_config: ChannelConfig = serde_json::from_str(&channel_config_json)
        .unwrap_or(ChannelConfig { credentials_ref: String::new(), company_number: String::new() });
    let ai_config: AiConfigRef = serde_json::from_str(&ai_config_json).unwrap_or(AiConfigRef {
        api_key_ref: String::new(),
        assistant_id_replies: String::new(),
    });
    let messages: Vec<MessageTurn> = serde_json::from_str(&messages_json).unwrap_or_default();
    let conversation_status = conversation_status_str
        .parse()
        .unwrap_or(ConversationStatus::Active);
    let auto_queue_reply_message_from_number: Vec<String> =
        serde_json::from_str(&auto_queue_number_json).unwrap_or_default();
    let auto_queue_reply_message_from_email: Vec<String> =
        serde_json::from_str(&auto_queue_email_json).unwrap_or_default();

    Ok(Conversation {
        primary_channel: row.get(0)?,
        conversation_id: row.get(1)?,
        project_status: row.get(2)?,
        allowed_channels,
        channel_config,
        ai_config,
        thread_id: row.get(6)?,
        messages,
        conversation_status,
        task_complete: row.get::<_, i64>(9)? != 0,
        hand_off_to_human: row.get::<_, i64>(10)? != 0,
        hand_off_to_human_reason: row.get(11)?,
        auto_queue_reply_message: row.get::<_, i64>(12)? != 0,
        auto_queue_reply_message_from_number,
        auto_queue_reply_message_from_email,
        initial_processing_time_ms: row.get::<_, Option<i64>>(15)?.map(|v| v as u64),
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchline_core::types::TurnRole;

    fn test_store() -> KvStore {
        KvStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn seed_conversation(store: &KvStore, primary_channel: &str, conversation_id: &str) {
        let db = store.lock();
        db.execute(
            "INSERT INTO conversations
               (primary_channel, conversation_id, project_status, allowed_channels,
                channel_config, ai_config, messages, conversation_status,
                gsi_company_whatsapp_number, gsi_recipient_tel, created_at, updated_at)
             VALUES (?1, ?2, 'active', '[\"whatsapp\"]',
                     '{\"credentials_ref\":\"secret-1\",\"company_number\":\"+10000\"}',
                     '{\"api_key_ref\":\"ai-secret\",\"assistant_id_replies\":\"asst_1\"}',
                     '[]', 'active', '+10000', '+20000', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            params![primary_channel, conversation_id],
        )
        .unwrap();
    }

    #[test]
    fn trigger_lock_is_exclusive() {
        let store = test_store();
        assert_eq!(
            store.acquire_trigger_lock("conv_1", 10, 60).unwrap(),
            TriggerLockOutcome::Acquired
        );
        assert_eq!(
            store.acquire_trigger_lock("conv_1", 10, 60).unwrap(),
            TriggerLockOutcome::Exists
        );
    }

    #[test]
    fn staging_fragment_is_idempotent_on_message_sid() {
        let store = test_store();
        store
            .stage_fragment("conv_1", "SM1", "+20000", "Hello", 10, 60)
            .unwrap();
        store
            .stage_fragment("conv_1", "SM1", "+20000", "Hello", 10, 60)
            .unwrap();
        let rows = store.query_staging("conv_1").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn processing_lock_rejects_second_acquirer() {
        let store = test_store();
        seed_conversation(&store, "+20000", "conv_1");
        assert_eq!(
            store.acquire_processing_lock("+20000", "conv_1").unwrap(),
            ProcessingLockOutcome::Acquired
        );
        assert_eq!(
            store.acquire_processing_lock("+20000", "conv_1").unwrap(),
            ProcessingLockOutcome::Exists
        );
    }

    #[test]
    fn commit_reply_fails_once_lock_released() {
        let store = test_store();
        seed_conversation(&store, "+20000", "conv_1");
        store.release_lock_for_retry("+20000", "conv_1").unwrap();

        let user_turn = MessageTurn {
            message_id: "SM1".into(),
            timestamp: now_rfc3339(),
            role: TurnRole::User,
            content: "hi".into(),
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        };
        let assistant_turn = MessageTurn {
            message_id: "SM2".into(),
            timestamp: now_rfc3339(),
            role: TurnRole::Assistant,
            content: "hello".into(),
            prompt_tokens: Some(1),
            completion_tokens: Some(1),
            total_tokens: Some(2),
        };

        let outcome = store
            .commit_reply(
                "+20000",
                "conv_1",
                user_turn,
                assistant_turn,
                ConversationStatus::ReplySent,
                Some(100),
                true,
                false,
                None,
                None,
            )
            .unwrap();
        assert_eq!(outcome, CommitOutcome::LockLost);
    }

    #[test]
    fn credential_lookup_strips_channel_prefix() {
        let store = test_store();
        seed_conversation(&store, "+20000", "conv_1");
        let found = store
            .lookup_credential_ref(Channel::Whatsapp, "whatsapp:+20000", "whatsapp:+10000")
            .unwrap();
        match found {
            CredentialLookup::Found { credential_ref, conversation_id } => {
                assert_eq!(credential_ref, "secret-1");
                assert_eq!(conversation_id, "conv_1");
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }
}
