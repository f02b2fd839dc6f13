//! Transport layer for the broker link
//!
//! This module provides the transport abstraction the session is written
//! against, and the rumqttc-backed implementation in [`mqtt`]. The split
//! mirrors the underlying client: a cheap cloneable [`Link`] handle for
//! outbound requests and a [`LinkEvents`] stream that must be polled to drive
//! the connection.

use bytes::Bytes;
use thiserror::Error;

pub mod endpoint;
pub mod mqtt;

pub use endpoint::BrokerEndpoint;

/// Outcome code carried by a connection acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCode {
    Accepted,
    /// MQTT 3.1.1 CONNACK return code (1..=5)
    Refused(u8),
}

impl ConnectCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ConnectCode::Accepted => 0,
            ConnectCode::Refused(code) => code,
        }
    }

    pub fn describe(self) -> &'static str {
        match self.as_u8() {
            0 => "connection accepted",
            1 => "unacceptable protocol version",
            2 => "client identifier rejected",
            3 => "server unavailable",
            4 => "bad user name or password",
            5 => "not authorized",
            _ => "unknown refusal code",
        }
    }
}

/// Inbound events produced by a live link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Handshake finished
    ConnAck {
        code: ConnectCode,
        session_present: bool,
    },
    /// Message received on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// Subscription acknowledgment; `granted` is false if any filter was refused
    SubAck { packet_id: u16, granted: bool },
}

/// Link-level faults
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Link closed")]
    Closed,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Outbound half of a live link
#[async_trait::async_trait]
pub trait Link: Clone + Send + Sync + 'static {
    /// Hand a message to the transport
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Request a subscription; the acknowledgment arrives as [`LinkEvent::SubAck`]
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Best-effort graceful close
    async fn close(&self) -> Result<(), TransportError>;
}

/// Inbound half of a live link
#[async_trait::async_trait]
pub trait LinkEvents: Send + 'static {
    /// Wait for the next meaningful event. An error means the link is down.
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError>;
}

/// Factory for links to a broker
///
/// `open` fails only when the link cannot be set up at all; the handshake
/// result is reported later through the event stream.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: Link;
    type Events: LinkEvents;

    async fn open(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> Result<(Self::Link, Self::Events), TransportError>;
}
