//! Broker endpoint description

use std::fmt;
use std::time::Duration;

/// Default MQTT port for plain TCP
pub const DEFAULT_PORT: u16 = 1883;

/// Default keep-alive interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Where the broker lives. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    host: String,
    port: u16,
    keep_alive: Duration,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16, keep_alive: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            keep_alive,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT, DEFAULT_KEEP_ALIVE)
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint() {
        let endpoint = BrokerEndpoint::default();
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 1883);
        assert_eq!(endpoint.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_display() {
        let endpoint = BrokerEndpoint::new("broker.local", 8883, Duration::from_secs(30));
        assert_eq!(endpoint.to_string(), "broker.local:8883");
    }
}
