//! Broker session management
//!
//! - [`state`] - pure connection state machine and reconnection policy
//! - [`registry`] - topics to replay after every (re)connection
//! - [`topic`] - topic and filter validation
//! - [`dispatcher`] - event delivery to handlers and stream consumers
//! - `supervisor` - background task driving a live link
//! - [`client`] - the [`MqttSession`] façade

pub mod client;
pub mod dispatcher;
pub mod registry;
pub mod state;
mod supervisor;
pub mod topic;

pub use client::{MqttSession, PublishReceipt, SessionConfig, DEFAULT_TOPIC};
pub use dispatcher::{EventDispatcher, EventHandler, InboundMessage, LoggingHandler, SessionEvent};
pub use registry::{Subscription, SubscriptionRegistry};
pub use state::{BackoffStrategy, ConnectionState, ReconnectPolicy};
