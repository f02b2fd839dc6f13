//! Publish/subscribe façade
//!
//! [`MqttSession`] is the API application code calls. It validates
//! preconditions against the current state, mutates the shared core under
//! its lock and hands long-running work to the supervisor task.

use super::dispatcher::{EventDispatcher, EventHandler, SessionEvent};
use super::state::{ConnectionState, ReconnectPolicy, SessionInput, SessionMonitor};
use super::supervisor::{self, SessionCore, Shared};
use super::topic::{validate_publish_topic, validate_topic_filter};
use crate::error::{ClientError, ClientResult};
use crate::transport::{BrokerEndpoint, Connector, Link};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Topic used when an operation omits one
pub const DEFAULT_TOPIC: &str = "test_A";

/// How long `disconnect` waits for the supervisor before aborting it
const SUPERVISOR_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-instance session settings
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub endpoint: BrokerEndpoint,
    pub default_topic: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: BrokerEndpoint::default(),
            default_topic: DEFAULT_TOPIC.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Successful publish outcome. With QoS 0 this means "handed to the transport".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub topic: String,
    pub payload_len: usize,
}

/// A persistent broker session with automatic recovery
///
/// ```rust,no_run
/// use detect_relay::session::{MqttSession, SessionConfig};
/// use detect_relay::transport::mqtt::RumqttConnector;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let session = MqttSession::new(SessionConfig::default(), RumqttConnector::default());
/// session.connect().await?;
/// session.wait_until_connected(Duration::from_secs(10)).await?;
/// session.subscribe(None).await?;
/// session.publish(Some("sensor/1"), "(320,240)").await?;
/// session.disconnect().await?;
/// # Ok::<(), detect_relay::error::ClientError>(())
/// # });
/// ```
pub struct MqttSession<C: Connector> {
    shared: Arc<Shared<C>>,
    default_topic: String,
    state_rx: watch::Receiver<ConnectionState>,
}

impl<C: Connector> MqttSession<C> {
    /// Create a disconnected session. Must be called inside a Tokio runtime.
    pub fn new(config: SessionConfig, connector: C) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            core: Mutex::new(SessionCore::new(state_tx)),
            connector,
            endpoint: config.endpoint,
            policy: config.reconnect,
            dispatcher: EventDispatcher::spawn(),
            stop: std::sync::Mutex::new(None),
        });

        Self {
            shared,
            default_topic: config.default_topic,
            state_rx,
        }
    }

    /// Start a connection attempt
    ///
    /// Returns once the link has been opened and the handshake dispatched.
    /// The outcome is observed through [`state`](Self::state), the event
    /// stream or a registered handler.
    pub async fn connect(&self) -> ClientResult<()> {
        let span = crate::lifecycle_span!(operation = "connect", endpoint = %self.shared.endpoint);
        self.connect_inner().instrument(span).await
    }

    async fn connect_inner(&self) -> ClientResult<()> {
        let mut core = self.shared.core.lock().await;
        match core.state {
            ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                return Err(ClientError::AlreadyConnecting)
            }
            ConnectionState::Disconnected => {}
        }

        core.generation += 1;
        let generation = core.generation;
        core.apply(SessionInput::ConnectRequested);
        info!("Connecting to MQTT broker");

        let (link, events) = match self.shared.connector.open(&self.shared.endpoint).await {
            Ok(opened) => opened,
            Err(e) => {
                core.apply(SessionInput::LinkDown);
                self.shared.dispatcher.emit(SessionEvent::ConnectFailed {
                    result_code: None,
                    reason: e.to_string(),
                });
                return Err(ClientError::connect_failure(
                    self.shared.endpoint.to_string(),
                    e.to_string(),
                ));
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shared.remember_stop(shutdown_tx.clone());
        core.link = Some(link);
        core.shutdown = Some(shutdown_tx);
        core.supervisor = Some(supervisor::spawn(
            self.shared.clone(),
            events,
            generation,
            shutdown_rx,
        ));
        Ok(())
    }

    /// Publish to `topic`, or the default topic when `None`
    pub async fn publish(
        &self,
        topic: Option<&str>,
        payload: impl Into<Bytes>,
    ) -> ClientResult<PublishReceipt> {
        let topic = self.resolve(topic);
        validate_publish_topic(topic)?;
        let payload = payload.into();

        // Admission is decided on the state read here; the send happens
        // without the lock so publishers never wait on each other
        let link = {
            let core = self.shared.core.lock().await;
            if !SessionMonitor::can_publish(core.state) {
                return Err(ClientError::NotConnected { state: core.state });
            }
            core.link.clone().ok_or(ClientError::NotConnected { state: core.state })?
        };

        let payload_len = payload.len();
        link.publish(topic, payload)
            .await
            .map_err(|e| ClientError::PublishRejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!(topic, payload_len, "Published message");
        Ok(PublishReceipt {
            topic: topic.to_string(),
            payload_len,
        })
    }

    /// Subscribe to `topic`, or the default topic when `None`
    ///
    /// The topic is always registered and will be replayed on every future
    /// connection. When not Connected this returns `NotConnected` and the
    /// subscribe frame is sent on the next successful handshake.
    pub async fn subscribe(&self, topic: Option<&str>) -> ClientResult<()> {
        let topic = self.resolve(topic);
        validate_topic_filter(topic)?;

        let mut core = self.shared.core.lock().await;
        let added = core.registry.add(topic);

        if !SessionMonitor::can_subscribe(core.state) {
            debug!(topic, state = %core.state, "Subscription registered for replay");
            return Err(ClientError::NotConnected { state: core.state });
        }
        if !added {
            debug!(topic, "Already subscribed");
            return Ok(());
        }

        let link = core
            .link
            .clone()
            .ok_or(ClientError::NotConnected { state: core.state })?;
        link.subscribe(topic)
            .await
            .map_err(|e| ClientError::SubscribeRejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        info!(topic, "Subscribed");
        Ok(())
    }

    /// Forget `topic`. Returns false if it was not registered.
    pub async fn unsubscribe(&self, topic: Option<&str>) -> ClientResult<bool> {
        let topic = self.resolve(topic);
        validate_topic_filter(topic)?;

        let mut core = self.shared.core.lock().await;
        if !core.registry.remove(topic) {
            return Ok(false);
        }

        if core.state == ConnectionState::Connected {
            if let Some(link) = core.link.clone() {
                link.unsubscribe(topic)
                    .await
                    .map_err(|e| ClientError::SubscribeRejected {
                        topic: topic.to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }

        info!(topic, "Unsubscribed");
        Ok(true)
    }

    /// End the session and stop any automatic reconnection. Idempotent.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let span = crate::lifecycle_span!(operation = "disconnect", endpoint = %self.shared.endpoint);
        self.disconnect_inner().instrument(span).await
    }

    async fn disconnect_inner(&self) -> ClientResult<()> {
        let (previous, link, shutdown, supervisor) = {
            let mut core = self.shared.core.lock().await;
            let previous = core.state;
            core.generation += 1;
            core.apply(SessionInput::DisconnectRequested);
            (
                previous,
                core.link.take(),
                core.shutdown.take(),
                core.supervisor.take(),
            )
        };

        // Close first and keep the supervisor polling, so queued publishes
        // and the DISCONNECT packet reach the broker before the link drops
        let deadline = Instant::now() + SUPERVISOR_JOIN_TIMEOUT;
        let mut supervisor = supervisor;
        if let Some(link) = link {
            match link.close().await {
                Ok(()) => {
                    if let Some(handle) = supervisor.as_mut() {
                        if join_supervisor(handle, deadline).await {
                            supervisor = None;
                        }
                    }
                }
                Err(e) => debug!(error = %e, "Link close failed, dropping it anyway"),
            }
        }

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }

        if let Some(mut handle) = supervisor {
            if !join_supervisor(&mut handle, deadline).await {
                warn!("Supervisor didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }

        if previous != ConnectionState::Disconnected {
            self.shared.dispatcher.emit(SessionEvent::Disconnected {
                result_code: 0,
                reason: "client disconnected".to_string(),
            });
            info!("MQTT session disconnected");
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the state equals `target`. Returns false on timeout.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut state_rx = self.state_rx.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if *state_rx.borrow_and_update() == target {
                    return true;
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Wait for the current connection attempt to finish
    ///
    /// Fails if the attempt ends in Disconnected or does not finish in time.
    pub async fn wait_until_connected(&self, timeout: Duration) -> ClientResult<()> {
        let mut state_rx = self.state_rx.clone();
        let endpoint = self.shared.endpoint.to_string();

        let outcome = tokio::time::timeout(timeout, async move {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected => {
                        return Err("connection attempt failed".to_string())
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err("state channel closed".to_string());
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ClientError::connect_failure(endpoint, reason)),
            Err(_) => Err(ClientError::connect_failure(
                endpoint,
                "ConnAck timeout - no connection confirmation received",
            )),
        }
    }

    /// Registered topics in replay order
    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.core.lock().await.registry.all()
    }

    /// Stream of every event, delivered after the registered handlers ran
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.dispatcher.subscribe()
    }

    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        self.shared.dispatcher.register(handler);
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.shared.endpoint
    }

    fn resolve<'a>(&'a self, topic: Option<&'a str>) -> &'a str {
        topic.unwrap_or(&self.default_topic)
    }
}

/// Wait for a supervisor until `deadline`. Returns true once it has ended.
async fn join_supervisor(handle: &mut JoinHandle<()>, deadline: Instant) -> bool {
    match tokio::time::timeout_at(deadline, handle).await {
        Ok(Ok(())) => {
            debug!("Supervisor shut down gracefully");
            true
        }
        Ok(Err(e)) => {
            if !e.is_cancelled() {
                warn!("Supervisor ended with error: {}", e);
            }
            true
        }
        Err(_) => false,
    }
}

impl<C: Connector> Drop for MqttSession<C> {
    fn drop(&mut self) {
        // Without this the supervisor would keep reconnecting for a session
        // nobody can reach any more
        self.shared.signal_stop();
        if let Ok(mut core) = self.shared.core.try_lock() {
            core.generation += 1;
            if let Some(handle) = core.supervisor.take() {
                handle.abort();
            }
        }
    }
}
