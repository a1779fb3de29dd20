pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::{QueueEngine, QueueHandle};
pub use error::{QueueError, Result};
pub use types::Delivery;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn enqueue_then_extend_then_delete() {
        let handle = QueueHandle::new(Connection::open_in_memory().unwrap()).unwrap();
        let id = handle.enqueue("whatsapp", "{}", 0, 5).unwrap();
        assert!(!id.is_empty());
    }

    #[test]
    fn extend_visibility_unknown_receipt_is_not_found() {
        let handle = QueueHandle::new(Connection::open_in_memory().unwrap()).unwrap();
        let err = handle.extend_visibility("does-not-exist", 60).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn delete_unknown_receipt_is_not_found() {
        let handle = QueueHandle::new(Connection::open_in_memory().unwrap()).unwrap();
        let err = handle.delete("does-not-exist").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
