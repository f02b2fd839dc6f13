//! rumqttc-backed transport
//!
//! Split the same way as the rest of the transport code: pure functions
//! first, I/O last.
//!
//! - [`connection`] - pure option building from endpoint and connector settings
//! - [`message_handler`] - pure mapping of rumqttc events into link events
//! - [`link`] - the `Connector`, `Link` and `LinkEvents` implementations
//!
//! # Usage
//!
//! ```rust,no_run
//! use detect_relay::transport::mqtt::{ConnectorOptions, RumqttConnector};
//! use detect_relay::transport::{BrokerEndpoint, Connector};
//!
//! # tokio_test::block_on(async {
//! let connector = RumqttConnector::new(ConnectorOptions::default());
//! let (_link, _events) = connector.open(&BrokerEndpoint::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod link;
pub mod message_handler;

pub use connection::{
    configure_mqtt_options, publish_packet_size, ConnectorOptions, DEFAULT_MAX_PACKET_SIZE,
};
pub use link::{RumqttConnector, RumqttEvents, RumqttLink};
pub use message_handler::MessageHandler;
