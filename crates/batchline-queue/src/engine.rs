use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{QueueError, Result},
    types::Delivery,
};

/// Shared handle for `Enqueue`/`ExtendVisibility`/`Delete` while the engine's
/// tick loop runs on its own connection — mirrors `skynet-scheduler`'s
/// `SchedulerHandle`/`SchedulerEngine` split.
pub struct QueueHandle {
    conn: Arc<Mutex<Connection>>,
}

impl QueueHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// `Enqueue(queue, body, delay_seconds)`. Returns the message id.
    pub fn enqueue(
        &self,
        queue: &str,
        body: &str,
        delay_seconds: u64,
        max_receives: u32,
    ) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let visible_at = now.timestamp() + delay_seconds as i64;
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO queue_messages
               (id, queue, body, visible_at, receipt, receive_count, max_receives, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, 0, ?5, ?6, ?6)",
            params![id, queue, body, visible_at, max_receives, now_str],
        )?;
        info!(message_id = %id, %queue, delay_seconds, "message enqueued");
        Ok(id)
    }

    /// `ExtendVisibility(queue, lease, new_timeout)`.
    pub fn extend_visibility(&self, receipt: &str, new_timeout_secs: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let visible_at = now.timestamp() + new_timeout_secs as i64;
        let changed = conn.execute(
            "UPDATE queue_messages SET visible_at = ?1, updated_at = ?2 WHERE receipt = ?3",
            params![visible_at, now.to_rfc3339(), receipt],
        )?;
        if changed == 0 {
            return Err(QueueError::NotFound(receipt.to_string()));
        }
        Ok(())
    }

    /// `Delete(queue, lease)`.
    pub fn delete(&self, receipt: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM queue_messages WHERE receipt = ?1", params![receipt])?;
        if changed == 0 {
            return Err(QueueError::NotFound(receipt.to_string()));
        }
        Ok(())
    }
}

/// Polls for due messages and hands them out, generalizing `skynet-scheduler`'s
/// one-shot/recurring `jobs` tick loop into redeliverable message delivery
/// with visibility timeout and dead-lettering.
pub struct QueueEngine {
    conn: Connection,
    delivered_tx: mpsc::Sender<Delivery>,
    default_visibility_secs: u64,
}

impl QueueEngine {
    pub fn new(
        conn: Connection,
        delivered_tx: mpsc::Sender<Delivery>,
        default_visibility_secs: u64,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn, delivered_tx, default_visibility_secs })
    }

    /// Main event loop. Polls every second until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("queue engine started");

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("queue tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("queue engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Hand out every message whose visibility has arrived; dead-letter any
    /// whose `receive_count` would exceed `max_receives` instead of redelivering.
    fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        // Columns: id, queue, body, receive_count, max_receives
        let due: Vec<(String, String, String, u32, u32)> = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT id, queue, body, receive_count, max_receives FROM queue_messages
                 WHERE visible_at <= ?1",
            )?;
            let rows: Vec<_> = stmt
                .query_map(params![now.timestamp()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        for (id, queue, body, receive_count, max_receives) in due {
            let new_count = receive_count + 1;

            if new_count > max_receives {
                self.conn.execute(
                    "INSERT INTO queue_messages_dead_letter
                       (id, queue, body, receive_count, dead_lettered_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![id, queue, body, receive_count, now_str],
                )?;
                self.conn
                    .execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
                warn!(message_id = %id, %queue, receive_count, "message dead-lettered");
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            let visible_at = now.timestamp() + self.default_visibility_secs as i64;

            self.conn.execute(
                "UPDATE queue_messages SET receipt = ?1, receive_count = ?2, visible_at = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![receipt, new_count, visible_at, now_str, id],
            )?;

            let delivery = Delivery { id: id.clone(), queue: queue.clone(), body, receipt, receive_count: new_count };
            if self.delivered_tx.try_send(delivery).is_err() {
                warn!(message_id = %id, %queue, "delivery channel full or closed — message dropped, will redeliver at next visibility timeout");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn due_message_is_delivered_and_receives_a_receipt() {
        let (tx, mut rx) = mpsc::channel(8);
        let engine_conn = Connection::open_in_memory().unwrap();
        init_db(&engine_conn).unwrap();
        engine_conn
            .execute(
                "INSERT INTO queue_messages (id, queue, body, visible_at, receipt, receive_count, max_receives, created_at, updated_at)
                 VALUES ('m1', 'whatsapp', '{}', 0, NULL, 0, 5, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        let mut engine = QueueEngine::new(engine_conn, tx, 30).unwrap();
        engine.tick().unwrap();

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.id, "m1");
        assert_eq!(delivered.receive_count, 1);
        assert!(!delivered.receipt.is_empty());
    }

    #[tokio::test]
    async fn message_over_max_receives_is_dead_lettered() {
        let engine_conn = Connection::open_in_memory().unwrap();
        init_db(&engine_conn).unwrap();
        engine_conn
            .execute(
                "INSERT INTO queue_messages (id, queue, body, visible_at, receipt, receive_count, max_receives, created_at, updated_at)
                 VALUES ('m2', 'whatsapp', '{}', 0, NULL, 5, 5, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = QueueEngine::new(engine_conn, tx, 30).unwrap();
        engine.tick().unwrap();

        assert!(rx.try_recv().is_err());
        let dead: i64 = engine
            .conn
            .query_row("SELECT COUNT(*) FROM queue_messages_dead_letter", [], |r| r.get(0))
            .unwrap();
        assert_eq!(dead, 1);
    }
}
