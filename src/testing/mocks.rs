//! Mock transport for testing
//!
//! [`MockConnector`] stands in for a broker. It records every outbound frame,
//! lets tests script how each `open` behaves, and exposes controls to
//! acknowledge, refuse or break the current link and to deliver messages.

use crate::transport::{
    BrokerEndpoint, ConnectCode, Connector, Link, LinkEvent, LinkEvents, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<LinkEvent, TransportError>>;

/// Outbound frame recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Publish { topic: String, payload: Bytes },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Disconnect,
}

/// What the next `open` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Open succeeds and the broker accepts the handshake immediately
    Accept,
    /// Open succeeds and the broker refuses with this return code
    Refuse(u8),
    /// Open succeeds and nothing happens until the test drives the link
    Silent,
    /// Open itself fails
    Fail,
}

#[derive(Debug, Default)]
struct MockState {
    frames: Vec<Frame>,
    open_count: usize,
    script: VecDeque<OpenBehavior>,
    auto_ack: bool,
    reject_publishes: bool,
    current: Option<EventSender>,
}

/// Scriptable in-memory broker
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Every open succeeds and stays silent until driven
    pub fn new() -> Self {
        Self::default()
    }

    /// Unscripted opens are accepted immediately
    pub fn with_auto_ack(self) -> Self {
        self.lock().auto_ack = true;
        self
    }

    /// Queue the behavior of the next unscripted open
    pub fn then(self, behavior: OpenBehavior) -> Self {
        self.lock().script.push_back(behavior);
        self
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.script.push_back(OpenBehavior::Fail);
        }
    }

    /// Make the next open end in a refused handshake
    pub fn refuse_next(&self, code: u8) {
        self.lock().script.push_back(OpenBehavior::Refuse(code));
    }

    pub fn reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    /// Accept the handshake on the current link
    pub fn acknowledge(&self) -> bool {
        self.send(Ok(LinkEvent::ConnAck {
            code: ConnectCode::Accepted,
            session_present: false,
        }))
    }

    /// Refuse the handshake on the current link
    pub fn refuse(&self, code: u8) -> bool {
        self.send(Ok(LinkEvent::ConnAck {
            code: ConnectCode::Refused(code),
            session_present: false,
        }))
    }

    /// Break the current link as if the network dropped
    pub fn drop_link(&self) -> bool {
        let sent = self.send(Err(TransportError::Network(
            "connection reset by peer".to_string(),
        )));
        self.lock().current = None;
        sent
    }

    /// Deliver an inbound message on the current link
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.send(Ok(LinkEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        }))
    }

    /// Deliver a subscription acknowledgment on the current link
    pub fn suback(&self, packet_id: u16, granted: bool) -> bool {
        self.send(Ok(LinkEvent::SubAck { packet_id, granted }))
    }

    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.lock().frames.clone()
    }

    /// Topics of every recorded subscribe frame, in order
    pub fn subscribe_frames(&self) -> Vec<String> {
        self.lock()
            .frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Subscribe { topic } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    /// (topic, payload) of every recorded publish frame, in order
    pub fn publish_frames(&self) -> Vec<(String, Bytes)> {
        self.lock()
            .frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Publish { topic, payload } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear_frames(&self) {
        self.lock().frames.clear();
    }

    fn send(&self, event: Result<LinkEvent, TransportError>) -> bool {
        match &self.lock().current {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Connector for MockConnector {
    type Link = MockLink;
    type Events = MockEvents;

    async fn open(
        &self,
        _endpoint: &BrokerEndpoint,
    ) -> Result<(Self::Link, Self::Events), TransportError> {
        let mut state = self.lock();
        state.open_count += 1;

        let default = if state.auto_ack {
            OpenBehavior::Accept
        } else {
            OpenBehavior::Silent
        };
        let behavior = state.script.pop_front().unwrap_or(default);
        if behavior == OpenBehavior::Fail {
            return Err(TransportError::Network("mock open failure".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        match behavior {
            OpenBehavior::Accept => {
                let _ = sender.send(Ok(LinkEvent::ConnAck {
                    code: ConnectCode::Accepted,
                    session_present: false,
                }));
            }
            OpenBehavior::Refuse(code) => {
                let _ = sender.send(Ok(LinkEvent::ConnAck {
                    code: ConnectCode::Refused(code),
                    session_present: false,
                }));
            }
            OpenBehavior::Silent | OpenBehavior::Fail => {}
        }
        state.current = Some(sender.clone());

        Ok((
            MockLink {
                state: self.state.clone(),
                sender,
            },
            MockEvents { receiver },
        ))
    }
}

/// Outbound half of a mock link
#[derive(Debug, Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
    sender: EventSender,
}

impl MockLink {
    fn record(&self, frame: Frame) {
        lock_state(&self.state).frames.push(frame);
    }
}

#[async_trait]
impl Link for MockLink {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if lock_state(&self.state).reject_publishes {
            return Err(TransportError::Rejected("mock publish rejection".to_string()));
        }
        self.record(Frame::Publish {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(Frame::Subscribe {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(Frame::Unsubscribe {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.record(Frame::Disconnect);
        let _ = self.sender.send(Err(TransportError::Closed));
        Ok(())
    }
}

/// Inbound half of a mock link
#[derive(Debug)]
pub struct MockEvents {
    receiver: mpsc::UnboundedReceiver<Result<LinkEvent, TransportError>>,
}

#[async_trait]
impl LinkEvents for MockEvents {
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError> {
        match self.receiver.recv().await {
            Some(event) => event,
            None => Err(TransportError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_frames() {
        // Arrange
        let connector = MockConnector::new();
        let (link, _events) = connector.open(&BrokerEndpoint::default()).await.unwrap();

        // Act
        link.publish("sensor/1", Bytes::from_static(b"start"))
            .await
            .unwrap();
        link.subscribe("test_A").await.unwrap();
        link.unsubscribe("test_A").await.unwrap();
        link.close().await.unwrap();

        // Assert
        assert_eq!(
            connector.frames(),
            vec![
                Frame::Publish {
                    topic: "sensor/1".to_string(),
                    payload: Bytes::from_static(b"start"),
                },
                Frame::Subscribe {
                    topic: "test_A".to_string()
                },
                Frame::Unsubscribe {
                    topic: "test_A".to_string()
                },
                Frame::Disconnect,
            ]
        );
        assert_eq!(connector.subscribe_frames(), vec!["test_A"]);
    }

    #[tokio::test]
    async fn test_scripted_opens() {
        let connector = MockConnector::new()
            .then(OpenBehavior::Fail)
            .then(OpenBehavior::Refuse(5));

        assert!(connector.open(&BrokerEndpoint::default()).await.is_err());

        let (_link, mut events) = connector.open(&BrokerEndpoint::default()).await.unwrap();
        assert_eq!(
            events.next_event().await,
            Ok(LinkEvent::ConnAck {
                code: ConnectCode::Refused(5),
                session_present: false,
            })
        );
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test]
    async fn test_controls_drive_current_link() {
        let connector = MockConnector::new();
        assert!(!connector.acknowledge(), "no link open yet");

        let (_link, mut events) = connector.open(&BrokerEndpoint::default()).await.unwrap();
        assert!(connector.deliver("t", "(1,2)"));
        assert!(connector.drop_link());

        assert!(matches!(
            events.next_event().await,
            Ok(LinkEvent::Message { .. })
        ));
        assert!(matches!(
            events.next_event().await,
            Err(TransportError::Network(_))
        ));
        assert!(!connector.deliver("t", "late"));
    }

    #[tokio::test]
    async fn test_reject_publishes() {
        let connector = MockConnector::new();
        connector.reject_publishes(true);
        let (link, _events) = connector.open(&BrokerEndpoint::default()).await.unwrap();

        let result = link.publish("t", Bytes::from_static(b"x")).await;

        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert!(connector.publish_frames().is_empty());
    }
}
