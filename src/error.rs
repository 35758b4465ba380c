//! Error types for subagent-trace
//!
//! Domain-specific error enums using thiserror. Malformed payloads and
//! uncorrelated events are not errors at all; only transport failures and
//! local I/O surface to callers.

use crate::model::Topic;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("JSON parse: {0}")]
    Json(String),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("subscribe to {topic} rejected: {reason}")]
    SubscribeRejected { topic: Topic, reason: String },
    #[error("unsubscribe from {topic} failed: {reason}")]
    UnsubscribeFailed { topic: Topic, reason: String },
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("consumer task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for AggregatorError {
    fn from(e: tokio::task::JoinError) -> Self {
        AggregatorError::Join(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatcherError {
    #[error("notify: {0}")]
    Notify(String),
    #[error("I/O: {0}")]
    Io(String),
}

impl From<notify::Error> for WatcherError {
    fn from(e: notify::Error) -> Self {
        WatcherError::Notify(e.to_string())
    }
}

impl From<std::io::Error> for WatcherError {
    fn from(e: std::io::Error) -> Self {
        WatcherError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopicKind;

    #[test]
    fn test_subscribe_rejected_display_names_topic() {
        let error = TransportError::SubscribeRejected {
            topic: Topic::lifecycle(TopicKind::Output, "p1"),
            reason: "quota".into(),
        };
        let display = error.to_string();
        assert!(display.contains("subagent-output:p1"));
        assert!(display.contains("quota"));
    }

    #[test]
    fn test_aggregator_error_is_transparent_over_transport() {
        let error: AggregatorError = TransportError::Closed.into();
        assert_eq!(error.to_string(), "transport closed");
    }

    #[test]
    fn test_config_read_error_preserves_io_error_kind() {
        let error = ConfigError::Read {
            path: "/etc/subagent-trace.toml".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(error.to_string().contains("/etc/subagent-trace.toml"));

        let source_err = std::error::Error::source(&error).unwrap();
        let io_err = source_err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io_err.kind(), std::io::ErrorKind::NotFound);
    }
}
