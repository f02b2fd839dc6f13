//! Background driver of a live session
//!
//! One supervisor task runs per session. It owns the inbound half of the
//! link, applies state transitions, replays subscriptions after every
//! successful handshake and runs the reconnect loop. It never holds the core
//! lock while waiting on the network or a backoff timer.

use super::dispatcher::{EventDispatcher, SessionEvent, UNEXPECTED_DISCONNECT_CODE};
use super::registry::SubscriptionRegistry;
use super::state::{
    ConnectionState, ReconnectPolicy, ReconnectionDecision, SessionInput, SessionMonitor,
};
use crate::transport::{BrokerEndpoint, ConnectCode, Connector, Link, LinkEvent, LinkEvents};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Mutable session data, always accessed under one lock
pub(crate) struct SessionCore<L> {
    pub(crate) state: ConnectionState,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) link: Option<L>,
    /// Bumped by every `connect` and `disconnect`; supervisors from an older
    /// generation stop without touching state
    pub(crate) generation: u64,
    pub(crate) shutdown: Option<watch::Sender<bool>>,
    pub(crate) supervisor: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<L> SessionCore<L> {
    pub(crate) fn new(state_tx: watch::Sender<ConnectionState>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            registry: SubscriptionRegistry::new(),
            link: None,
            generation: 0,
            shutdown: None,
            supervisor: None,
            state_tx,
        }
    }

    /// Apply an input, publish the new state and log the transition
    pub(crate) fn apply(&mut self, input: SessionInput) -> Option<ConnectionState> {
        let next = self.state.on(input)?;
        let previous = self.state;
        self.state = next;
        self.state_tx.send_replace(next);
        if previous != next || next == ConnectionState::Reconnecting {
            SessionMonitor::log_transition(previous, next);
        }
        Some(next)
    }
}

/// Everything the façade and the supervisor share
pub(crate) struct Shared<C: Connector> {
    pub(crate) core: Mutex<SessionCore<C::Link>>,
    pub(crate) connector: C,
    pub(crate) endpoint: BrokerEndpoint,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) dispatcher: EventDispatcher,
    /// Copy of the live supervisor's shutdown sender, reachable without the core lock
    pub(crate) stop: std::sync::Mutex<Option<watch::Sender<bool>>>,
}

impl<C: Connector> Shared<C> {
    pub(crate) fn remember_stop(&self, shutdown: watch::Sender<bool>) {
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(shutdown);
    }

    /// Tell the live supervisor to stop, whoever holds the core lock
    pub(crate) fn signal_stop(&self) {
        let stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(shutdown) = stop.as_ref() {
            shutdown.send_replace(true);
        }
    }
}

/// Why the current link stopped being driven
#[derive(Debug)]
enum LinkOutcome {
    /// Handshake refused or link failed
    Down { code: Option<u8>, reason: String },
    /// Shutdown was signalled
    Shutdown,
}

/// Spawn the supervisor for the session identified by `generation`
pub(crate) fn spawn<C: Connector>(
    shared: Arc<Shared<C>>,
    events: C::Events,
    generation: u64,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let span = crate::mqtt_span!(endpoint = %shared.endpoint, generation);
    tokio::spawn(run(shared, events, generation, shutdown).instrument(span))
}

async fn run<C: Connector>(
    shared: Arc<Shared<C>>,
    mut events: C::Events,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        let (code, reason) =
            match drive_link(&shared, &mut events, generation, &mut shutdown, &mut attempts).await
            {
                LinkOutcome::Down { code, reason } => (code, reason),
                LinkOutcome::Shutdown => {
                    debug!("Supervisor stopping on shutdown signal");
                    return;
                }
            };

        if !handle_link_down(&shared, generation, code, reason).await {
            return;
        }

        match reconnect(&shared, generation, &mut shutdown, &mut attempts).await {
            Some(new_events) => events = new_events,
            None => return,
        }
    }
}

/// Poll the link until it goes down or shutdown is signalled
///
/// A superseded link is still polled so a pending close can flush; its
/// events no longer change state.
async fn drive_link<C: Connector>(
    shared: &Shared<C>,
    events: &mut C::Events,
    generation: u64,
    shutdown: &mut watch::Receiver<bool>,
    attempts: &mut u32,
) -> LinkOutcome {
    loop {
        if *shutdown.borrow() {
            return LinkOutcome::Shutdown;
        }

        let next = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return LinkOutcome::Shutdown;
                }
                continue;
            }
            next = events.next_event() => next,
        };

        match next {
            Ok(LinkEvent::ConnAck {
                code: ConnectCode::Accepted,
                session_present,
            }) => {
                if on_connected(shared, generation, session_present).await {
                    *attempts = 0;
                } else {
                    debug!("Handshake completed on a superseded link, draining");
                }
            }
            Ok(LinkEvent::ConnAck { code, .. }) => {
                return LinkOutcome::Down {
                    code: Some(code.as_u8()),
                    reason: code.describe().to_string(),
                };
            }
            Ok(LinkEvent::Message { topic, payload }) => {
                shared
                    .dispatcher
                    .emit(SessionEvent::from_inbound(topic, payload));
            }
            Ok(LinkEvent::SubAck { packet_id, granted }) => {
                if !granted {
                    warn!(packet_id, "Subscription refused by broker");
                    shared
                        .dispatcher
                        .emit(SessionEvent::SubscribeRejected { packet_id });
                }
            }
            Err(e) => {
                return LinkOutcome::Down {
                    code: None,
                    reason: e.to_string(),
                };
            }
        }
    }
}

/// Enter Connected and replay the registry. Returns false if superseded.
async fn on_connected<C: Connector>(
    shared: &Shared<C>,
    generation: u64,
    session_present: bool,
) -> bool {
    let mut core = shared.core.lock().await;
    if core.generation != generation {
        return false;
    }
    if core.apply(SessionInput::ConnAckAccepted).is_none() {
        debug!(state = %core.state, "Ignoring unexpected ConnAck");
        return true;
    }

    // Replay under the lock so a concurrent subscribe is neither lost nor doubled
    if let Some(link) = core.link.clone() {
        let topics = core.registry.all();
        for topic in &topics {
            if let Err(e) = link.subscribe(topic).await {
                warn!(topic = %topic, error = %e, "Failed to replay subscription");
            }
        }
        if !topics.is_empty() {
            info!(count = topics.len(), "Replayed subscriptions");
        }
    }

    shared.dispatcher.emit(SessionEvent::Connected {
        result_code: 0,
        session_present,
    });
    true
}

/// Apply the link-down transition. Returns true when a reconnect should follow.
async fn handle_link_down<C: Connector>(
    shared: &Shared<C>,
    generation: u64,
    code: Option<u8>,
    reason: String,
) -> bool {
    let mut core = shared.core.lock().await;
    if core.generation != generation {
        return false;
    }

    let previous = core.state;
    let input = match code {
        Some(_) if previous.on(SessionInput::ConnAckRefused).is_some() => {
            SessionInput::ConnAckRefused
        }
        _ => SessionInput::LinkDown,
    };
    let Some(next) = core.apply(input) else {
        return false;
    };
    core.link = None;

    match (previous, next) {
        (ConnectionState::Connecting, ConnectionState::Disconnected) => {
            warn!(result_code = ?code, reason = %reason, "Connection attempt failed");
            core.shutdown = None;
            shared.dispatcher.emit(SessionEvent::ConnectFailed {
                result_code: code,
                reason,
            });
            false
        }
        (ConnectionState::Connected, ConnectionState::Reconnecting) => {
            shared.dispatcher.emit(SessionEvent::Disconnected {
                result_code: UNEXPECTED_DISCONNECT_CODE,
                reason,
            });
            true
        }
        (_, ConnectionState::Reconnecting) => {
            debug!(result_code = ?code, reason = %reason, "Reconnection attempt failed");
            true
        }
        _ => false,
    }
}

/// Back off and open a fresh link. `None` means the supervisor should stop.
async fn reconnect<C: Connector>(
    shared: &Shared<C>,
    generation: u64,
    shutdown: &mut watch::Receiver<bool>,
    attempts: &mut u32,
) -> Option<C::Events> {
    loop {
        let shutdown_requested = *shutdown.borrow();
        let (attempt, delay) = match SessionMonitor::should_attempt_reconnection(
            *attempts,
            &shared.policy,
            shutdown_requested,
        ) {
            ReconnectionDecision::Proceed { attempt, delay } => (attempt, delay),
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                return None;
            }
        };
        *attempts = attempt;

        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnection attempt");
        shared
            .dispatcher
            .emit(SessionEvent::Reconnecting { attempt, delay });

        if !interruptible_sleep(shutdown, delay).await {
            return None;
        }

        // Final shutdown check before creating a new connection
        if *shutdown.borrow() {
            info!("Shutdown signal received, aborting reconnection");
            return None;
        }

        match shared.connector.open(&shared.endpoint).await {
            Ok((link, events)) => {
                let mut core = shared.core.lock().await;
                if core.generation != generation || core.state != ConnectionState::Reconnecting {
                    drop(core);
                    let _ = link.close().await;
                    return None;
                }
                core.link = Some(link);
                debug!(attempt, "Opened new link for reconnection attempt");
                return Some(events);
            }
            Err(e) => {
                warn!(attempt, error = %e, "Failed to open link, will retry");
            }
        }
    }
}

/// Sleep for `delay` unless shutdown is signalled first. Returns false on shutdown.
pub(crate) async fn interruptible_sleep(
    shutdown: &mut watch::Receiver<bool>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, mut rx) = watch::channel(false);

        let result = interruptible_sleep(&mut rx, Duration::from_millis(10)).await;

        assert!(result, "Sleep should complete without shutdown");
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        // Arrange
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });

        // Act
        let started = tokio::time::Instant::now();
        let result = interruptible_sleep(&mut rx, Duration::from_secs(30)).await;

        // Assert
        assert!(!result, "Sleep should be interrupted by shutdown");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_stops_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        assert!(!interruptible_sleep(&mut rx, Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_ignores_false_updates() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = tx.send(false);
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(tx);
        });

        assert!(interruptible_sleep(&mut rx, Duration::from_millis(10)).await);
    }

    #[test]
    fn test_core_apply_publishes_state() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let mut core: SessionCore<()> = SessionCore::new(state_tx);

        assert_eq!(
            core.apply(SessionInput::ConnectRequested),
            Some(ConnectionState::Connecting)
        );
        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);

        assert_eq!(core.apply(SessionInput::ConnectRequested), None);
        assert_eq!(core.state, ConnectionState::Connecting);
    }
}
