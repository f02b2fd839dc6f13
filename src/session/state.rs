//! Pure connection state machine and reconnection policy
//!
//! Everything in here is free of I/O. The supervisor feeds inputs through
//! [`ConnectionState::on`] and acts on the resulting transition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default delay between reconnection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Inputs that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// Application called `connect()`
    ConnectRequested,
    /// Broker accepted the handshake
    ConnAckAccepted,
    /// Broker answered the handshake with a failure code
    ConnAckRefused,
    /// Link failed, either during an attempt or after establishment
    LinkDown,
    /// Application called `disconnect()`
    DisconnectRequested,
}

impl ConnectionState {
    /// Next state for `input`, or `None` when the input does not apply here
    pub fn on(self, input: SessionInput) -> Option<ConnectionState> {
        use ConnectionState::*;
        use SessionInput::*;

        match (self, input) {
            (_, DisconnectRequested) => Some(Disconnected),
            (Disconnected, ConnectRequested) => Some(Connecting),
            (Connecting, ConnAckAccepted) => Some(Connected),
            (Connecting, ConnAckRefused | LinkDown) => Some(Disconnected),
            (Connected, LinkDown) => Some(Reconnecting),
            (Reconnecting, ConnAckAccepted) => Some(Connected),
            (Reconnecting, ConnAckRefused | LinkDown) => Some(Reconnecting),
            _ => None,
        }
    }

    /// True while a connection attempt is outstanding
    pub fn is_attempting(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// Doubling delay, capped at `max`
    Exponential { max: Duration },
}

/// Reconnection configuration. Attempts are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            interval: initial,
            strategy: BackoffStrategy::Exponential { max },
        }
    }

    /// Delay before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.interval,
            BackoffStrategy::Exponential { max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.interval
                    .checked_mul(1u32 << exponent)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Pure decision helpers used by the supervisor and the façade
pub struct SessionMonitor;

impl SessionMonitor {
    /// Decide whether another attempt should be made after `current_attempts` failures
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        policy: &ReconnectPolicy,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: policy.delay_for(attempt),
        }
    }

    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    pub fn can_subscribe(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log a state transition at a level matching its severity
    pub fn log_transition(from: ConnectionState, to: ConnectionState) {
        use ConnectionState::*;

        match (from, to) {
            (Connecting, Connected) => info!("MQTT connection established"),
            (Reconnecting, Connected) => info!("MQTT reconnection successful"),
            (Connected, Reconnecting) => warn!("MQTT connection lost, reconnecting"),
            (Connecting, Disconnected) => error!("MQTT connection attempt failed"),
            (Reconnecting, Reconnecting) => debug!("MQTT reconnection attempt failed"),
            _ => info!("MQTT connection state: {} -> {}", from, to),
        }
    }
}
