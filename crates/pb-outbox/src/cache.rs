//! Delivery Cache
//!
//! Records provider-issued message ids under `msg:<id>` with no expiry.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use pb_common::{delivery_key, DeliveryRecord};
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::error::{DispatchError, Result};

#[async_trait]
pub trait DeliveryCache: Send + Sync {
    /// Write a delivery record. Failures are returned, never swallowed.
    async fn record(&self, record: &DeliveryRecord) -> Result<()>;

    /// Provider id stored for a message, if any.
    async fn lookup(&self, message_id: i64) -> Result<Option<String>>;
}

/// Redis-backed delivery cache
#[derive(Clone)]
pub struct RedisDeliveryCache {
    conn: ConnectionManager,
}

impl RedisDeliveryCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| DispatchError::CacheWrite(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| DispatchError::CacheWrite(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DeliveryCache for RedisDeliveryCache {
    async fn record(&self, record: &DeliveryRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = record.cache_key();

        redis::cmd("SET")
            .arg(&key)
            .arg(&record.provider_message_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| DispatchError::CacheWrite(e.to_string()))?;

        debug!(key = %key, "Recorded delivery");
        Ok(())
    }

    async fn lookup(&self, message_id: i64) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(delivery_key(message_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Query(e.to_string()))
    }
}

/// Process-local delivery cache, used when Redis is disabled and in tests.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryDeliveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl DeliveryCache for InMemoryDeliveryCache {
    async fn record(&self, record: &DeliveryRecord) -> Result<()> {
        self.entries
            .lock()
            .insert(record.cache_key(), record.provider_message_id.clone());
        Ok(())
    }

    async fn lookup(&self, message_id: i64) -> Result<Option<String>> {
        Ok(self.entries.lock().get(&delivery_key(message_id)).cloned())
    }
}
