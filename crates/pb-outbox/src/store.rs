//! Message Store Trait
//!
//! Persistence interface for outbox messages. Unsent batches are returned in
//! ascending id order so that delivery order is stable across polls.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pb_common::{Message, NewMessage};

use crate::error::{DispatchError, Result};

/// Table holding outbox messages
pub const MESSAGES_TABLE: &str = "messages";

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new unsent message; the store assigns `id` and `created_at`.
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    /// Up to `limit` messages with `sent = false`, ascending by id.
    async fn fetch_unsent(&self, limit: u32) -> Result<Vec<Message>>;

    /// All messages with `sent = true`, ascending by id.
    async fn fetch_sent(&self) -> Result<Vec<Message>>;

    async fn find(&self, id: i64) -> Result<Option<Message>>;

    /// Mark one message sent. Marking an already-sent message is a no-op;
    /// an unknown id is an `Update` error.
    async fn mark_sent(&self, id: i64) -> Result<()>;

    /// Create the messages table if it does not exist.
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    messages: BTreeMap<i64, Message>,
}

/// Process-local store, used for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    state: Mutex<MemoryState>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let stored = Message {
            id: state.next_id,
            recipient: message.recipient,
            content: message.content,
            sent: false,
            created_at: Utc::now(),
        };
        state.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn fetch_unsent(&self, limit: u32) -> Result<Vec<Message>> {
        let state = self.state.lock();
        Ok(state
            .messages
            .values()
            .filter(|m| !m.sent)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_sent(&self) -> Result<Vec<Message>> {
        let state = self.state.lock();
        Ok(state.messages.values().filter(|m| m.sent).cloned().collect())
    }

    async fn find(&self, id: i64) -> Result<Option<Message>> {
        Ok(self.state.lock().messages.get(&id).cloned())
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock();
        match state.messages.get_mut(&id) {
            Some(message) => {
                message.sent = true;
                Ok(())
            }
            None => Err(DispatchError::Update(format!("message {} not found", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(count: usize) -> InMemoryMessageStore {
        let store = InMemoryMessageStore::new();
        for i in 0..count {
            store
                .insert(NewMessage::new(format!("user{}@example.com", i), "hello"))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = InMemoryMessageStore::new();
        let first = store.insert(NewMessage::new("a@b.com", "one")).await.unwrap();
        let second = store.insert(NewMessage::new("a@b.com", "two")).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(!first.sent);
    }

    #[tokio::test]
    async fn test_fetch_unsent_respects_limit_and_order() {
        let store = seeded(5).await;
        let batch = store.fetch_unsent(2).await.unwrap();
        assert_eq!(batch.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);

        store.mark_sent(1).await.unwrap();
        let batch = store.fetch_unsent(2).await.unwrap();
        assert_eq!(batch.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_mark_sent_is_idempotent() {
        let store = seeded(1).await;
        store.mark_sent(1).await.unwrap();
        store.mark_sent(1).await.unwrap();
        let sent = store.fetch_sent().await.unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].sent);
        assert!(store.fetch_unsent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_sent_unknown_id() {
        let store = seeded(1).await;
        assert!(matches!(
            store.mark_sent(99).await,
            Err(DispatchError::Update(_))
        ));
    }
}
