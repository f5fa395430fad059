//! Outbox dispatcher
//!
//! Polls a message store for unsent messages, delivers each to a webhook,
//! records the provider-issued id in a delivery cache and marks the message
//! sent. The [`DispatchController`] starts and stops the background loop.

pub mod error;
pub mod store;
pub mod cache;
pub mod webhook;
pub mod dispatch_loop;
pub mod controller;
pub mod outbox_metrics;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export key types
pub use error::{DispatchError, ErrorScope, Result};
pub use store::{InMemoryMessageStore, MessageStore, MESSAGES_TABLE};
pub use cache::{DeliveryCache, InMemoryDeliveryCache, RedisDeliveryCache};
pub use webhook::{HttpWebhookClient, HttpWebhookConfig, WebhookClient};
pub use dispatch_loop::{BatchReport, DispatchLoop, LoopConfig, LoopExit};
pub use controller::DispatchController;

#[cfg(feature = "postgres")]
pub use postgres::PostgresMessageStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMessageStore;
