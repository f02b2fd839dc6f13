//! Error types for the detect-relay client
//!
//! Every public session operation returns [`ClientResult`]. Transport-level
//! faults are carried as [`TransportError`] and wrapped on the way out.

use crate::config::ConfigError;
use crate::serial::SerialError;
use crate::session::state::ConnectionState;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectFailure { endpoint: String, reason: String },

    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },

    #[error("A connection attempt is already in flight")]
    AlreadyConnecting,

    #[error("Client is already connected")]
    AlreadyConnected,

    #[error("Publish to '{topic}' rejected: {reason}")]
    PublishRejected { topic: String, reason: String },

    #[error("Subscribe to '{topic}' rejected: {reason}")]
    SubscribeRejected { topic: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial device error: {0}")]
    Serial(#[from] SerialError),
}

impl ClientError {
    /// Create connection failure error
    pub fn connect_failure<E: Into<String>, R: Into<String>>(endpoint: E, reason: R) -> Self {
        Self::ConnectFailure {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create invalid topic error
    pub fn invalid_topic<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// True when the operation was refused because the session is not Connected
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }
}

/// Result type for session operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_mentions_state() {
        let error = ClientError::NotConnected {
            state: ConnectionState::Reconnecting,
        };
        assert_eq!(
            error.to_string(),
            "Not connected - current state: reconnecting"
        );
        assert!(error.is_not_connected());
    }

    #[test]
    fn test_connect_failure_constructor() {
        let error = ClientError::connect_failure("localhost:1883", "connection refused");
        assert!(matches!(error, ClientError::ConnectFailure { .. }));
        assert_eq!(
            error.to_string(),
            "Connection to localhost:1883 failed: connection refused"
        );
        assert!(!error.is_not_connected());
    }

    #[test]
    fn test_invalid_topic_constructor() {
        let error = ClientError::invalid_topic("a/#/b", "'#' must be the last level");
        assert_eq!(
            error.to_string(),
            "Invalid topic 'a/#/b': '#' must be the last level"
        );
    }

    #[test]
    fn test_transport_error_converts() {
        let error: ClientError = TransportError::Closed.into();
        assert!(matches!(error, ClientError::Transport(TransportError::Closed)));
    }

    #[test]
    fn test_all_variants_display() {
        let errors = vec![
            ClientError::AlreadyConnecting,
            ClientError::AlreadyConnected,
            ClientError::PublishRejected {
                topic: "t".to_string(),
                reason: "queue full".to_string(),
            },
            ClientError::SubscribeRejected {
                topic: "t".to_string(),
                reason: "not authorized".to_string(),
            },
            ClientError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
