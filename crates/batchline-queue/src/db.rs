use rusqlite::Connection;

use crate::error::Result;

/// Initialise the `queue_messages` and `queue_messages_dead_letter` tables.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue_messages (
            id             TEXT    NOT NULL PRIMARY KEY,
            queue          TEXT    NOT NULL,
            body           TEXT    NOT NULL,
            visible_at     INTEGER NOT NULL,
            receipt        TEXT,
            receive_count  INTEGER NOT NULL DEFAULT 0,
            max_receives   INTEGER NOT NULL,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_messages_due ON queue_messages (queue, visible_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_messages_receipt ON queue_messages (receipt);

        CREATE TABLE IF NOT EXISTS queue_messages_dead_letter (
            id             TEXT    NOT NULL PRIMARY KEY,
            queue          TEXT    NOT NULL,
            body           TEXT    NOT NULL,
            receive_count  INTEGER NOT NULL,
            dead_lettered_at TEXT  NOT NULL,
            created_at     TEXT    NOT NULL
        );
        ",
    )?;
    Ok(())
}
