//! Impure I/O for the rumqttc transport
//!
//! Wraps rumqttc's `AsyncClient` / `EventLoop` pair behind the [`Link`] and
//! [`LinkEvents`] traits. Each call to [`RumqttConnector::open`] builds a
//! fresh pair, so a reconnect never reuses a dead event loop.

use super::connection::{
    configure_mqtt_options, publish_packet_size, qos_from_level, ConnectorOptions,
};
use super::message_handler::MessageHandler;
use crate::transport::{
    BrokerEndpoint, Connector, Link, LinkEvent, LinkEvents, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, QoS};
use tracing::debug;

/// Opens rumqttc-backed links
#[derive(Debug, Clone, Default)]
pub struct RumqttConnector {
    options: ConnectorOptions,
}

impl RumqttConnector {
    pub fn new(options: ConnectorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConnectorOptions {
        &self.options
    }
}

#[async_trait]
impl Connector for RumqttConnector {
    type Link = RumqttLink;
    type Events = RumqttEvents;

    async fn open(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> Result<(Self::Link, Self::Events), TransportError> {
        let qos = qos_from_level(self.options.qos)?;
        let mqtt_options = configure_mqtt_options(endpoint, &self.options)?;
        debug!(
            target: "mqtt_transport",
            client_id = %mqtt_options.client_id(),
            endpoint = %endpoint,
            "Opening MQTT link"
        );

        // The TCP connect and CONNECT packet happen on the first poll
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.options.request_capacity);
        Ok((
            RumqttLink {
                client,
                qos,
                max_packet_size: self.options.max_packet_size,
            },
            RumqttEvents { event_loop },
        ))
    }
}

/// Outbound handle of a rumqttc link
#[derive(Clone)]
pub struct RumqttLink {
    client: AsyncClient,
    qos: QoS,
    max_packet_size: usize,
}

#[async_trait]
impl Link for RumqttLink {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        // The event loop fails the whole connection on an oversize packet,
        // so it must never be queued
        let size = publish_packet_size(topic, payload.len(), self.qos);
        if size > self.max_packet_size {
            return Err(TransportError::Rejected(format!(
                "packet of {} bytes exceeds the {} byte limit",
                size, self.max_packet_size
            )));
        }

        self.client
            .publish_bytes(topic, self.qos, false, payload)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    // Subscriptions are sent while the session lock is held, sometimes by the
    // task that polls the event loop, so they must not wait on a full queue.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, self.qos)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }
}

/// Inbound half of a rumqttc link
pub struct RumqttEvents {
    event_loop: EventLoop,
}

#[async_trait]
impl LinkEvents for RumqttEvents {
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError> {
        loop {
            match self.event_loop.poll().await {
                Ok(event) => {
                    if MessageHandler::disconnect_sent(&event) {
                        debug!(target: "mqtt_transport", "DISCONNECT flushed");
                        return Err(TransportError::Closed);
                    }
                    if let Some(routed) = MessageHandler::route_event(&event) {
                        return Ok(routed);
                    }
                }
                Err(error) => return MessageHandler::route_error(error),
            }
        }
    }
}
