//! detect-relay
//!
//! A persistent MQTT session with automatic recovery, plus the glue that
//! forwards newline-terminated tokens from an upstream byte stream to the
//! broker.
//!
//! # Overview
//!
//! - [`session::MqttSession`] - connect, disconnect, publish, subscribe
//! - [`session::EventHandler`] - lifecycle and message callbacks
//! - [`transport`] - the link abstraction and its rumqttc implementation
//! - [`bridge::forward_lines`] - token forwarding
//! - [`serial`] - the serial device as an async byte stream
//! - [`config::AppConfig`] - TOML configuration
//!
//! # Quick Start
//!
//! ```rust
//! use detect_relay::session::{ConnectionState, MqttSession, SessionConfig};
//! use detect_relay::testing::MockConnector;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let broker = MockConnector::new().with_auto_ack();
//! let session = MqttSession::new(SessionConfig::default(), broker.clone());
//!
//! session.connect().await?;
//! session.wait_until_connected(Duration::from_secs(1)).await?;
//! assert_eq!(session.state(), ConnectionState::Connected);
//!
//! let receipt = session.publish(Some("sensor/1"), "(320,240)").await?;
//! assert_eq!(receipt.payload_len, 9);
//!
//! session.disconnect().await?;
//! # Ok::<(), detect_relay::error::ClientError>(())
//! # });
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod serial;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{AppConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use session::{ConnectionState, EventHandler, MqttSession, SessionConfig, SessionEvent};
pub use transport::mqtt::RumqttConnector;
