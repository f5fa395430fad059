//! Error taxonomy for the dispatch core

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Store unreachable while fetching messages
    #[error("Query error: {0}")]
    Query(String),

    /// Webhook unreachable, timed out, or answered with a non-success status
    #[error("Transport error: {0}")]
    Transport(String),

    /// Webhook response body could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Store write failed, or the message does not exist
    #[error("Update error: {0}")]
    Update(String),

    /// Delivery record could not be written to the cache
    #[error("Cache write error: {0}")]
    CacheWrite(String),
}

/// Blast radius of a failure, used by the `skip_failed` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Affects only the message being delivered
    Message,
    /// The store could not be queried; no batch is available this cycle
    Store,
}

impl DispatchError {
    pub fn scope(&self) -> ErrorScope {
        match self {
            DispatchError::Query(_) => ErrorScope::Store,
            DispatchError::Transport(_)
            | DispatchError::Decode(_)
            | DispatchError::Update(_)
            | DispatchError::CacheWrite(_) => ErrorScope::Message,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Query(_) => "query",
            DispatchError::Transport(_) => "transport",
            DispatchError::Decode(_) => "decode",
            DispatchError::Update(_) => "update",
            DispatchError::CacheWrite(_) => "cache_write",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_classification() {
        assert_eq!(DispatchError::Transport("x".into()).scope(), ErrorScope::Message);
        assert_eq!(DispatchError::Decode("x".into()).scope(), ErrorScope::Message);
        assert_eq!(DispatchError::CacheWrite("x".into()).scope(), ErrorScope::Message);
        assert_eq!(DispatchError::Update("x".into()).scope(), ErrorScope::Message);
        assert_eq!(DispatchError::Query("x".into()).scope(), ErrorScope::Store);
    }

    #[test]
    fn test_display() {
        let err = DispatchError::Transport("connection refused".into());
        assert_eq!(err.to_string(), "Transport error: connection refused");
        assert_eq!(err.kind(), "transport");
    }
}
