//! SQLite Message Store Implementation
//!
//! `created_at` is stored as epoch milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pb_common::{Message, NewMessage};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::store::{MessageStore, MESSAGES_TABLE};

/// SQLite implementation of MessageStore
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Message, String> {
        let created_at_ms: i64 = row.try_get("created_at").map_err(|e| e.to_string())?;
        let created_at = DateTime::from_timestamp_millis(created_at_ms)
            .ok_or_else(|| format!("invalid created_at timestamp: {}", created_at_ms))?;

        Ok(Message {
            id: row.try_get("id").map_err(|e| e.to_string())?,
            recipient: row.try_get("recipient").map_err(|e| e.to_string())?,
            content: row.try_get("content").map_err(|e| e.to_string())?,
            sent: row.try_get("sent").map_err(|e| e.to_string())?,
            created_at,
        })
    }

    async fn select(&self, query: &str, limit: Option<i64>) -> std::result::Result<Vec<Message>, String> {
        let mut q = sqlx::query(query);
        if let Some(limit) = limit {
            q = q.bind(limit);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(|e| e.to_string())?;
        rows.iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let query = format!(
            "INSERT INTO {} (recipient, content, sent, created_at) VALUES (?, ?, 0, ?) \
             RETURNING id, recipient, content, sent, created_at",
            MESSAGES_TABLE
        );

        let row = sqlx::query(&query)
            .bind(&message.recipient)
            .bind(&message.content)
            .bind(Utc::now().timestamp_millis())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DispatchError::Update(e.to_string()))?;

        let stored = Self::parse_row(&row).map_err(DispatchError::Update)?;
        debug!(message_id = stored.id, "Inserted message");
        Ok(stored)
    }

    async fn fetch_unsent(&self, limit: u32) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT id, recipient, content, sent, created_at FROM {} \
             WHERE sent = 0 ORDER BY id ASC LIMIT ?",
            MESSAGES_TABLE
        );

        let messages = self
            .select(&query, Some(limit as i64))
            .await
            .map_err(DispatchError::Query)?;

        debug!(count = messages.len(), "Fetched unsent messages");
        Ok(messages)
    }

    async fn fetch_sent(&self) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT id, recipient, content, sent, created_at FROM {} \
             WHERE sent = 1 ORDER BY id ASC",
            MESSAGES_TABLE
        );

        self.select(&query, None).await.map_err(DispatchError::Query)
    }

    async fn find(&self, id: i64) -> Result<Option<Message>> {
        let query = format!(
            "SELECT id, recipient, content, sent, created_at FROM {} WHERE id = ?",
            MESSAGES_TABLE
        );

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DispatchError::Query(e.to_string()))?;

        row.as_ref()
            .map(Self::parse_row)
            .transpose()
            .map_err(DispatchError::Query)
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        let query = format!("UPDATE {} SET sent = 1 WHERE id = ?", MESSAGES_TABLE);

        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DispatchError::Update(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(DispatchError::Update(format!("message {} not found", id)));
        }

        debug!(message_id = id, "Marked message sent");
        Ok(())
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient TEXT NOT NULL,
                content TEXT NOT NULL,
                sent BOOLEAN NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            table = MESSAGES_TABLE,
        );
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_sent ON {table}(sent, id)",
            table = MESSAGES_TABLE,
        );

        for statement in [schema, index] {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DispatchError::Update(e.to_string()))?;
        }

        info!(table = MESSAGES_TABLE, "Initialized SQLite message schema");
        Ok(())
    }
}
