//! Aequitas Realtime - multiplexed push-update transport.
//!
//! This crate provides the channel manager that handles:
//! - One WebSocket connection per logical channel (forecasts, market,
//!   notifications, crisis, agents) shared by any number of subscribers
//! - Automatic reconnection with exponential backoff
//! - Heartbeat ping/pong with latency measurement and dead-link detection
//! - Buffering of sends made while a channel is not open
//! - Crisis alert escalation to an external handler
//! - Status change broadcasting and transport statistics

pub mod backoff;
pub mod channel;
pub mod crisis;
pub mod envelope;
pub mod heartbeat;
pub mod manager;
pub mod queue;
pub mod stats;
pub mod status;
pub mod subscription;
pub mod transport;

// Re-export key types
pub use channel::{Channel, ConnectionState};
pub use crisis::{CrisisAlert, CrisisHandler, CrisisSeverity, LogCrisisHandler};
pub use envelope::{Envelope, MessageType};
pub use manager::ChannelManager;
pub use stats::StatsSnapshot;
pub use status::{
    LogNotifier, Notification, NotificationKind, Notifier, Priority, StatusObserver,
};
pub use subscription::{SubscribeOptions, Subscription, SubscriptionId};
pub use transport::{Connection, Connector, OutboundFrame, TransportEvent, WsConnector};
