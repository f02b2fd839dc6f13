//! Event delivery to registered handlers
//!
//! Events are queued on an unbounded channel and drained by a dedicated
//! task. Handlers run on that task, in registration order, and never on the
//! caller's task or the supervisor. After the handlers, every event is also
//! forwarded to a broadcast channel for stream-style consumers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Capacity of the broadcast fan-out; slow receivers see `Lagged`
pub const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Result code reported when the link drops without a local `disconnect()`
pub const UNEXPECTED_DISCONNECT_CODE: u8 = 7;

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub topic: String,
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

fn serialize_payload<S: serde::Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Payload as text. Messages reaching handlers have already been
    /// checked, so this only fails for hand-built messages.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Lifecycle and data events emitted by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected {
        result_code: u8,
        session_present: bool,
    },
    /// Initial attempt failed; `result_code` is absent when the link itself failed
    ConnectFailed {
        result_code: Option<u8>,
        reason: String,
    },
    Disconnected {
        result_code: u8,
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    Message(InboundMessage),
    DecodeError {
        topic: String,
        reason: String,
        payload: Bytes,
    },
    SubscribeRejected {
        packet_id: u16,
    },
}

impl SessionEvent {
    /// Build a message event, or a decode error when the payload is not UTF-8
    pub fn from_inbound(topic: String, payload: Bytes) -> Self {
        match std::str::from_utf8(&payload) {
            Ok(_) => SessionEvent::Message(InboundMessage::new(topic, payload)),
            Err(e) => SessionEvent::DecodeError {
                topic,
                reason: e.to_string(),
                payload,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::ConnectFailed { .. } => "connect_failed",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::Reconnecting { .. } => "reconnecting",
            SessionEvent::Message(_) => "message",
            SessionEvent::DecodeError { .. } => "decode_error",
            SessionEvent::SubscribeRejected { .. } => "subscribe_rejected",
        }
    }
}

/// Receiver of session events
///
/// Every method has a no-op default so handlers only implement what they
/// care about. Methods run on the dispatcher task; keep them short.
pub trait EventHandler: Send + Sync {
    fn on_connected(&self, _result_code: u8, _session_present: bool) {}

    fn on_connect_failed(&self, _result_code: Option<u8>, _reason: &str) {}

    fn on_disconnected(&self, _result_code: u8, _reason: &str) {}

    fn on_reconnecting(&self, _attempt: u32, _delay: Duration) {}

    fn on_message(&self, _message: &InboundMessage) {}

    fn on_decode_error(&self, _topic: &str, _reason: &str, _payload: &[u8]) {}

    fn on_subscribe_rejected(&self, _packet_id: u16) {}
}

type HandlerList = Arc<RwLock<Vec<Arc<dyn EventHandler>>>>;

/// Queues events and fans them out from a dedicated task
#[derive(Clone)]
pub struct EventDispatcher {
    queue: mpsc::UnboundedSender<SessionEvent>,
    handlers: HandlerList,
    broadcast: broadcast::Sender<SessionEvent>,
}

impl EventDispatcher {
    /// Spawn the delivery task. Must be called inside a Tokio runtime.
    ///
    /// The task ends once every clone of the dispatcher has been dropped and
    /// the queue is drained.
    pub fn spawn() -> Self {
        let (queue, mut receiver) = mpsc::unbounded_channel::<SessionEvent>();
        let (broadcast, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let handlers: HandlerList = Arc::new(RwLock::new(Vec::new()));

        let task_handlers = handlers.clone();
        let task_broadcast = broadcast.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                Self::deliver(&task_handlers, &event);
                // No receivers is fine
                let _ = task_broadcast.send(event);
            }
            debug!("Event dispatcher stopped");
        });

        Self {
            queue,
            handlers,
            broadcast,
        }
    }

    /// Queue an event. Never blocks.
    pub fn emit(&self, event: SessionEvent) {
        if self.queue.send(event).is_err() {
            warn!("Event dispatcher is gone, dropping event");
        }
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        match self.handlers.read() {
            Ok(handlers) => handlers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn deliver(handlers: &HandlerList, event: &SessionEvent) {
        // Snapshot so handlers may register more handlers without deadlocking
        let snapshot: Vec<Arc<dyn EventHandler>> = match handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        for handler in snapshot {
            match event {
                SessionEvent::Connected {
                    result_code,
                    session_present,
                } => handler.on_connected(*result_code, *session_present),
                SessionEvent::ConnectFailed {
                    result_code,
                    reason,
                } => handler.on_connect_failed(*result_code, reason),
                SessionEvent::Disconnected {
                    result_code,
                    reason,
                } => handler.on_disconnected(*result_code, reason),
                SessionEvent::Reconnecting { attempt, delay } => {
                    handler.on_reconnecting(*attempt, *delay)
                }
                SessionEvent::Message(message) => handler.on_message(message),
                SessionEvent::DecodeError {
                    topic,
                    reason,
                    payload,
                } => handler.on_decode_error(topic, reason, payload),
                SessionEvent::SubscribeRejected { packet_id } => {
                    handler.on_subscribe_rejected(*packet_id)
                }
            }
        }
    }
}

/// Handler that logs every event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_connected(&self, result_code: u8, session_present: bool) {
        info!(result_code, session_present, "Connected to MQTT broker");
    }

    fn on_connect_failed(&self, result_code: Option<u8>, reason: &str) {
        error!(?result_code, reason, "Failed to connect to MQTT broker");
    }

    fn on_disconnected(&self, result_code: u8, reason: &str) {
        if result_code == 0 {
            info!(result_code, reason, "Disconnected from MQTT broker");
        } else {
            warn!(result_code, reason, "Unexpected disconnection from MQTT broker");
        }
    }

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to MQTT broker");
    }

    fn on_message(&self, message: &InboundMessage) {
        info!(
            topic = %message.topic,
            payload = message.payload_str().unwrap_or_default(),
            "Received message"
        );
    }

    fn on_decode_error(&self, topic: &str, reason: &str, payload: &[u8]) {
        warn!(topic, reason, payload_len = payload.len(), "Failed to decode message");
    }

    fn on_subscribe_rejected(&self, packet_id: u16) {
        warn!(packet_id, "Broker rejected subscription");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EventHandler for RecordingHandler {
        fn on_connected(&self, result_code: u8, _session_present: bool) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:connected:{}", self.name, result_code));
        }

        fn on_message(&self, message: &InboundMessage) {
            self.seen.lock().unwrap().push(format!(
                "{}:message:{}",
                self.name,
                message.payload_str().unwrap()
            ));
        }

        fn on_decode_error(&self, topic: &str, _reason: &str, _payload: &[u8]) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:decode_error:{}", self.name, topic));
        }
    }

    #[test]
    fn test_from_inbound_utf8() {
        let event = SessionEvent::from_inbound("sensor/1".to_string(), Bytes::from_static(b"start"));
        match event {
            SessionEvent::Message(message) => {
                assert_eq!(message.topic, "sensor/1");
                assert_eq!(message.payload_str(), Some("start"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_from_inbound_invalid_utf8() {
        let payload = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        let event = SessionEvent::from_inbound("sensor/1".to_string(), payload.clone());
        assert!(matches!(
            event,
            SessionEvent::DecodeError { ref topic, payload: ref p, .. } if topic == "sensor/1" && *p == payload
        ));
        assert_eq!(event.kind(), "decode_error");
    }

    #[test]
    fn test_inbound_message_serializes_payload_as_text() {
        let message = InboundMessage::new("sensor/1", Bytes::from_static(b"(320,240)"));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["topic"], "sensor/1");
        assert_eq!(json["payload"], "(320,240)");
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        // Arrange
        let dispatcher = EventDispatcher::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(Arc::new(RecordingHandler {
            name: "first",
            seen: seen.clone(),
        }));
        dispatcher.register(Arc::new(RecordingHandler {
            name: "second",
            seen: seen.clone(),
        }));
        let mut events = dispatcher.subscribe();

        // Act
        dispatcher.emit(SessionEvent::Connected {
            result_code: 0,
            session_present: false,
        });
        events.recv().await.unwrap();

        // Assert
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:connected:0", "second:connected:0"]
        );
        assert_eq!(dispatcher.handler_count(), 2);
    }

    #[tokio::test]
    async fn test_decode_error_does_not_stop_delivery() {
        let dispatcher = EventDispatcher::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(Arc::new(RecordingHandler {
            name: "h",
            seen: seen.clone(),
        }));
        let mut events = dispatcher.subscribe();

        dispatcher.emit(SessionEvent::from_inbound(
            "t".to_string(),
            Bytes::from_static(&[0xc3, 0x28]),
        ));
        dispatcher.emit(SessionEvent::from_inbound(
            "t".to_string(),
            Bytes::from_static(b"(1,2)"),
        ));

        assert_eq!(events.recv().await.unwrap().kind(), "decode_error");
        assert_eq!(events.recv().await.unwrap().kind(), "message");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["h:decode_error:t", "h:message:(1,2)"]
        );
    }

    #[tokio::test]
    async fn test_emit_without_listeners_is_harmless() {
        let dispatcher = EventDispatcher::spawn();
        dispatcher.emit(SessionEvent::SubscribeRejected { packet_id: 1 });

        let mut events = dispatcher.subscribe();
        dispatcher.emit(SessionEvent::SubscribeRejected { packet_id: 2 });
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SubscribeRejected { packet_id: 2 }
        );
    }

    #[test]
    fn test_logging_handler_accepts_every_event() {
        let handler = LoggingHandler;
        handler.on_connected(0, false);
        handler.on_connect_failed(Some(5), "not authorized");
        handler.on_disconnected(UNEXPECTED_DISCONNECT_CODE, "connection reset");
        handler.on_reconnecting(3, Duration::from_secs(5));
        handler.on_message(&InboundMessage::new("t", Bytes::from_static(b"start")));
        handler.on_decode_error("t", "invalid utf-8", &[0xff]);
        handler.on_subscribe_rejected(4);
    }
}
