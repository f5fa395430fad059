//! PostgreSQL Message Store Implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pb_common::{Message, NewMessage};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::store::{MessageStore, MESSAGES_TABLE};

/// PostgreSQL implementation of MessageStore
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> std::result::Result<Message, sqlx::Error> {
        Ok(Message {
            id: row.try_get("id")?,
            recipient: row.try_get("recipient")?,
            content: row.try_get("content")?,
            sent: row.try_get("sent")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    async fn select(&self, query: &str, limit: Option<i64>) -> std::result::Result<Vec<Message>, sqlx::Error> {
        let mut q = sqlx::query(query);
        if let Some(limit) = limit {
            q = q.bind(limit);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let query = format!(
            "INSERT INTO {} (recipient, content, sent, created_at) VALUES ($1, $2, FALSE, $3) \
             RETURNING id, recipient, content, sent, created_at",
            MESSAGES_TABLE
        );

        let row = sqlx::query(&query)
            .bind(&message.recipient)
            .bind(&message.content)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DispatchError::Update(e.to_string()))?;

        let stored = Self::parse_row(&row).map_err(|e| DispatchError::Update(e.to_string()))?;
        debug!(message_id = stored.id, "Inserted message");
        Ok(stored)
    }

    async fn fetch_unsent(&self, limit: u32) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT id, recipient, content, sent, created_at FROM {} \
             WHERE sent = FALSE ORDER BY id ASC LIMIT $1",
            MESSAGES_TABLE
        );

        let messages = self
            .select(&query, Some(limit as i64))
            .await
            .map_err(|e| DispatchError::Query(e.to_string()))?;

        debug!(count = messages.len(), "Fetched unsent messages");
        Ok(messages)
    }

    async fn fetch_sent(&self) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT id, recipient, content, sent, created_at FROM {} \
             WHERE sent = TRUE ORDER BY id ASC",
            MESSAGES_TABLE
        );

        self.select(&query, None)
            .await
            .map_err(|e| DispatchError::Query(e.to_string()))
    }

    async fn find(&self, id: i64) -> Result<Option<Message>> {
        let query = format!(
            "SELECT id, recipient, content, sent, created_at FROM {} WHERE id = $1",
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
            .map_err(|e| DispatchError::Query(e.to_string()))
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        let query = format!("UPDATE {} SET sent = TRUE WHERE id = $1", MESSAGES_TABLE);

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
                id BIGSERIAL PRIMARY KEY,
                recipient TEXT NOT NULL,
                content TEXT NOT NULL,
                sent BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table = MESSAGES_TABLE,
        );
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_unsent ON {table}(id) WHERE sent = FALSE",
            table = MESSAGES_TABLE,
        );

        for statement in [schema, index] {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DispatchError::Update(e.to_string()))?;
        }

        info!(table = MESSAGES_TABLE, "Initialized PostgreSQL message schema");
        Ok(())
    }
}
