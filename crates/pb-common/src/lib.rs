use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Outbox Message Types
// ============================================================================

/// An outgoing message persisted in the outbox.
///
/// `sent` only ever moves from `false` to `true`; sent messages are never
/// returned by unsent-batch queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub recipient: String,
    pub content: String,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Wire payload delivered to the webhook for this message.
    pub fn payload(&self) -> WebhookPayload {
        WebhookPayload {
            to: self.recipient.clone(),
            content: self.content.clone(),
        }
    }
}

/// A message to be inserted; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub recipient: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            content: content.into(),
        }
    }
}

// ============================================================================
// Delivery Records
// ============================================================================

/// Provider-issued identifier recorded against an internal message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub message_id: i64,
    pub provider_message_id: String,
}

impl DeliveryRecord {
    pub fn new(message_id: i64, provider_message_id: impl Into<String>) -> Self {
        Self {
            message_id,
            provider_message_id: provider_message_id.into(),
        }
    }

    /// Cache key for this record (`msg:<id>`).
    pub fn cache_key(&self) -> String {
        delivery_key(self.message_id)
    }
}

/// Cache key under which the provider id of a message is stored.
pub fn delivery_key(message_id: i64) -> String {
    format!("msg:{}", message_id)
}

// ============================================================================
// Webhook Wire Types
// ============================================================================

/// Outbound webhook body: `{"to": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub to: String,
    pub content: String,
}

/// Response field carrying the provider-issued message id.
pub const PROVIDER_ID_FIELD: &str = "message_id";

/// Parsed webhook response body: a JSON object whose values are all strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookResponse {
    pub fields: BTreeMap<String, String>,
}

impl WebhookResponse {
    /// Provider message id, if the response carries a non-empty `message_id`.
    pub fn provider_message_id(&self) -> Option<&str> {
        self.fields
            .get(PROVIDER_ID_FIELD)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

// ============================================================================
// Dispatcher State & Policy
// ============================================================================

/// Dispatcher lifecycle state. `Idle` is initial; there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    #[default]
    Idle,
    Running,
}

impl DispatchState {
    pub fn is_running(&self) -> bool {
        matches!(self, DispatchState::Running)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Idle => write!(f, "IDLE"),
            DispatchState::Running => write!(f, "RUNNING"),
        }
    }
}

/// What the dispatch loop does when delivering a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the batch and terminate the loop on the first error.
    #[default]
    StopOnError,
    /// Leave a failing message unsent and continue with the rest of the batch.
    SkipFailed,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "stop_on_error" => Ok(FailurePolicy::StopOnError),
            "skip_failed" => Ok(FailurePolicy::SkipFailed),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::StopOnError => write!(f, "stop_on_error"),
            FailurePolicy::SkipFailed => write!(f, "skip_failed"),
        }
    }
}
