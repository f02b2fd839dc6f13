//! Pure event routing for the rumqttc transport
//!
//! Translates rumqttc events and connection errors into [`LinkEvent`]s.
//! Infrastructure traffic (pings, outgoing packets, acks we do not track) is
//! filtered out here so the session only sees what changes its state.

use crate::transport::{ConnectCode, LinkEvent, TransportError};
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};
use tracing::trace;

/// Pure routing decisions for rumqttc events
pub struct MessageHandler;

impl MessageHandler {
    /// Map a rumqttc return code onto our connect code
    pub fn connect_code(code: ConnectReturnCode) -> ConnectCode {
        match code {
            ConnectReturnCode::Success => ConnectCode::Accepted,
            ConnectReturnCode::RefusedProtocolVersion => ConnectCode::Refused(1),
            ConnectReturnCode::BadClientId => ConnectCode::Refused(2),
            ConnectReturnCode::ServiceUnavailable => ConnectCode::Refused(3),
            ConnectReturnCode::BadUserNamePassword => ConnectCode::Refused(4),
            ConnectReturnCode::NotAuthorized => ConnectCode::Refused(5),
        }
    }

    /// Route a polled event; `None` means the event is not interesting to the session
    pub fn route_event(event: &Event) -> Option<LinkEvent> {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => Some(LinkEvent::ConnAck {
                code: Self::connect_code(connack.code),
                session_present: connack.session_present,
            }),
            Event::Incoming(Packet::Publish(publish)) => Some(LinkEvent::Message {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
            }),
            Event::Incoming(Packet::SubAck(suback)) => Some(LinkEvent::SubAck {
                packet_id: suback.pkid,
                granted: Self::subscription_granted(&suback.return_codes),
            }),
            Event::Incoming(other) => {
                trace!(target: "mqtt_transport", "Skipping incoming packet: {:?}", other);
                None
            }
            Event::Outgoing(outgoing) => {
                trace!(target: "mqtt_transport", "Outgoing: {:?}", outgoing);
                None
            }
        }
    }

    /// True once our DISCONNECT has been written and flushed; the link is done
    pub fn disconnect_sent(event: &Event) -> bool {
        matches!(event, Event::Outgoing(Outgoing::Disconnect))
    }

    /// Route a poll error. A refused handshake is reported as a ConnAck so the
    /// session sees the return code; everything else means the link is down.
    pub fn route_error(error: ConnectionError) -> Result<LinkEvent, TransportError> {
        match error {
            ConnectionError::ConnectionRefused(code) => Ok(LinkEvent::ConnAck {
                code: Self::connect_code(code),
                session_present: false,
            }),
            ConnectionError::RequestsDone => Err(TransportError::Closed),
            other => Err(TransportError::Network(other.to_string())),
        }
    }

    /// True unless the broker refused at least one filter
    pub fn subscription_granted(return_codes: &[SubscribeReasonCode]) -> bool {
        !return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    }
}
