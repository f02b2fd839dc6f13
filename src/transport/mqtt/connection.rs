//! Pure connection configuration for the rumqttc transport
//!
//! This module turns a [`BrokerEndpoint`] plus [`ConnectorOptions`] into
//! rumqttc [`MqttOptions`]. Nothing here touches the network.

use crate::transport::{BrokerEndpoint, TransportError};
use rumqttc::{MqttOptions, QoS};
use std::time::Duration;

/// Prefix for generated client identifiers
pub const CLIENT_ID_PREFIX: &str = "detect-relay";

/// Default capacity of the rumqttc request channel
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Default limit for a whole MQTT packet, in either direction
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024;

/// Per-connector settings that are not part of the endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorOptions {
    /// Fixed client identifier; a unique one is generated per attempt when `None`
    pub client_id: Option<String>,
    /// Pass-through credentials (username, password)
    pub credentials: Option<(String, String)>,
    /// Delivery level for publishes and subscriptions (0, 1 or 2)
    pub qos: u8,
    pub clean_session: bool,
    /// Capacity of the outbound request channel
    pub request_capacity: usize,
    /// Largest packet sent or accepted, fixed header included
    pub max_packet_size: usize,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            credentials: None,
            qos: 0,
            clean_session: true,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Map a numeric QoS level to the rumqttc enum
pub fn qos_from_level(level: u8) -> Result<QoS, TransportError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransportError::Protocol(format!(
            "QoS level must be 0, 1 or 2, got {other}"
        ))),
    }
}

/// Encoded size of a PUBLISH packet, fixed header included
pub fn publish_packet_size(topic: &str, payload_len: usize, qos: QoS) -> usize {
    let mut remaining = 2 + topic.len() + payload_len;
    if qos != QoS::AtMostOnce {
        remaining += 2;
    }
    1 + remaining_length_bytes(remaining) + remaining
}

fn remaining_length_bytes(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Reject client identifiers rumqttc or a broker cannot accept
pub fn check_client_id(client_id: &str, clean_session: bool) -> Result<(), TransportError> {
    if client_id.starts_with(char::is_whitespace) {
        return Err(TransportError::Protocol(
            "client id must not start with whitespace".to_string(),
        ));
    }
    if client_id.is_empty() && !clean_session {
        return Err(TransportError::Protocol(
            "an empty client id requires a clean session".to_string(),
        ));
    }
    Ok(())
}

/// Generate a client identifier unique to this connection attempt
pub fn generate_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}-{}", uuid::Uuid::new_v4().simple())
}

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(
    endpoint: &BrokerEndpoint,
    options: &ConnectorOptions,
) -> Result<MqttOptions, TransportError> {
    if endpoint.host().is_empty() {
        return Err(TransportError::Network("broker host is empty".to_string()));
    }

    let keep_alive = endpoint.keep_alive();
    if !keep_alive.is_zero() && keep_alive < Duration::from_secs(1) {
        return Err(TransportError::Protocol(
            "keep-alive must be zero or at least one second".to_string(),
        ));
    }

    let client_id = options
        .client_id
        .clone()
        .unwrap_or_else(generate_client_id);
    check_client_id(&client_id, options.clean_session)?;

    if options.max_packet_size == 0 {
        return Err(TransportError::Protocol(
            "max packet size must be positive".to_string(),
        ));
    }

    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host(), endpoint.port());
    mqtt_options
        .set_keep_alive(keep_alive)
        .set_clean_session(options.clean_session)
        .set_max_packet_size(options.max_packet_size, options.max_packet_size);

    if let Some((username, password)) = &options.credentials {
        mqtt_options.set_credentials(username.clone(), password.clone());
    }

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> BrokerEndpoint {
        BrokerEndpoint::new("localhost", 1883, Duration::from_secs(60))
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&endpoint(), &ConnectorOptions::default()).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.clean_session());
        assert!(options.client_id().starts_with("detect-relay-"));
    }

    #[test]
    fn test_fixed_client_id_is_kept() {
        let connector_options = ConnectorOptions {
            client_id: Some("camera-01".to_string()),
            ..Default::default()
        };
        let options = configure_mqtt_options(&endpoint(), &connector_options).unwrap();
        assert_eq!(options.client_id(), "camera-01");
    }

    #[test]
    fn test_generated_client_ids_are_unique() {
        assert_ne!(generate_client_id(), generate_client_id());
    }

    #[test]
    fn test_empty_host_rejected() {
        let endpoint = BrokerEndpoint::new("", 1883, Duration::from_secs(60));
        let result = configure_mqtt_options(&endpoint, &ConnectorOptions::default());
        assert!(matches!(result, Err(TransportError::Network(_))));
    }

    #[test]
    fn test_sub_second_keep_alive_rejected() {
        let endpoint = BrokerEndpoint::new("localhost", 1883, Duration::from_millis(500));
        let result = configure_mqtt_options(&endpoint, &ConnectorOptions::default());
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_empty_client_id_with_persistent_session_rejected() {
        let connector_options = ConnectorOptions {
            client_id: Some(String::new()),
            clean_session: false,
            ..Default::default()
        };

        let result = configure_mqtt_options(&endpoint(), &connector_options);

        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_client_id_rules() {
        assert!(check_client_id("", true).is_ok());
        assert!(check_client_id("", false).is_err());
        assert!(check_client_id(" relay", true).is_err());
        assert!(check_client_id("relay-01", false).is_ok());
    }

    #[test]
    fn test_max_packet_size_applied() {
        let connector_options = ConnectorOptions {
            max_packet_size: 4096,
            ..Default::default()
        };
        let options = configure_mqtt_options(&endpoint(), &connector_options).unwrap();
        assert_eq!(options.max_packet_size(), 4096);
    }

    #[test]
    fn test_publish_packet_size() {
        // 1 header byte, 1 length byte, 2 + 8 topic bytes, 9 payload bytes
        assert_eq!(publish_packet_size("sensor/1", 9, QoS::AtMostOnce), 21);
        assert_eq!(publish_packet_size("sensor/1", 9, QoS::AtLeastOnce), 23);
        // Remaining length of 130 needs two length bytes
        assert_eq!(publish_packet_size("t", 127, QoS::AtMostOnce), 1 + 2 + 130);
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_level(3).is_err());
    }
}
