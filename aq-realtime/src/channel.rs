//! Channel identities and per-channel connection state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use aq_core::error::AqError;

/// The fixed set of logical realtime streams.
///
/// Each channel maps to exactly one endpoint and at most one live
/// connection at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Liquidity forecast updates (`forecasts`).
    Forecasts,
    /// Market indicator ticks (`market`).
    Market,
    /// User-facing notifications (`notifications`).
    Notifications,
    /// Crisis simulation and alert stream (`crisis`).
    Crisis,
    /// AI agent messages (`agents`).
    Agents,
}

impl Channel {
    /// Every channel, in declaration order.
    pub const ALL: [Channel; 5] = [
        Channel::Forecasts,
        Channel::Market,
        Channel::Notifications,
        Channel::Crisis,
        Channel::Agents,
    ];

    /// The wire name of this channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forecasts => "forecasts",
            Self::Market => "market",
            Self::Notifications => "notifications",
            Self::Crisis => "crisis",
            Self::Agents => "agents",
        }
    }
}

impl FromStr for Channel {
    type Err = AqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forecasts" => Ok(Self::Forecasts),
            "market" => Ok(Self::Market),
            "notifications" => Ok(Self::Notifications),
            "crisis" => Ok(Self::Crisis),
            "agents" => Ok(Self::Agents),
            other => Err(AqError::InvalidChannel(other.to_string())),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Opening a connection.
    Connecting,
    /// Connected and receiving frames.
    Connected,
    /// Connection lost unexpectedly, backoff timer pending.
    Reconnecting,
    /// Reconnection attempts exhausted; only an explicit reconnect resumes.
    Error,
}

impl ConnectionState {
    /// Whether a connection is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}
