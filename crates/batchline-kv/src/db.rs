use rusqlite::Connection;

use crate::error::{classify, Result};

/// Initialise the three tables and their secondary indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            primary_channel        TEXT NOT NULL,
            conversation_id        TEXT NOT NULL,
            project_status         TEXT NOT NULL,
            allowed_channels       TEXT NOT NULL,
            channel_config         TEXT NOT NULL,
            ai_config              TEXT NOT NULL,
            thread_id              TEXT,
            messages                TEXT NOT NULL DEFAULT '[]',
            conversation_status    TEXT NOT NULL,
            task_complete          INTEGER NOT NULL DEFAULT 0,
            hand_off_to_human      INTEGER NOT NULL DEFAULT 0,
            hand_off_to_human_reason TEXT,
            auto_queue_reply_message INTEGER NOT NULL DEFAULT 0,
            auto_queue_reply_message_from_number TEXT NOT NULL DEFAULT '[]',
            auto_queue_reply_message_from_email  TEXT NOT NULL DEFAULT '[]',
            initial_processing_time_ms INTEGER,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            gsi_company_whatsapp_number TEXT,
            gsi_company_sms_number      TEXT,
            gsi_recipient_tel           TEXT,
            gsi_company_email           TEXT,
            gsi_recipient_email         TEXT,
            PRIMARY KEY (primary_channel, conversation_id)
        );
        CREATE INDEX IF NOT EXISTS idx_company_whatsapp_recipient_tel
            ON conversations(gsi_company_whatsapp_number, gsi_recipient_tel);
        CREATE INDEX IF NOT EXISTS idx_company_sms_recipient_tel
            ON conversations(gsi_company_sms_number, gsi_recipient_tel);
        CREATE INDEX IF NOT EXISTS idx_company_email_recipient_email
            ON conversations(gsi_company_email, gsi_recipient_email);

        CREATE TABLE IF NOT EXISTS staging_fragments (
            conversation_id TEXT NOT NULL,
            message_sid     TEXT NOT NULL,
            primary_channel TEXT NOT NULL,
            body            TEXT NOT NULL,
            received_at     TEXT NOT NULL,
            expires_at      INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, message_sid)
        );
        CREATE INDEX IF NOT EXISTS idx_staging_expires_at ON staging_fragments(expires_at);

        CREATE TABLE IF NOT EXISTS trigger_locks (
            conversation_id TEXT PRIMARY KEY,
            expires_at      INTEGER NOT NULL
        );",
    )
    .map_err(classify)?;
    Ok(())
}
