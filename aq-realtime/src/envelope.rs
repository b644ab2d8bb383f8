//! Wire envelope: the unit of data exchanged over a channel.
//!
//! Every frame is a JSON object
//! `{"type", "channel", "data", "timestamp", "sequence"?}`. Inbound frames are
//! parsed against the channel they arrived on; outbound envelopes are built
//! by callers and by the heartbeat monitor.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use aq_core::constants::message_types;
use aq_core::error::{AqError, AqResult};

use crate::channel::Channel;

/// Envelope `type` tag. Reserved tags are handled by the transport;
/// everything else is ordinary channel traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Heartbeat probe (`ping`).
    Ping,
    /// Heartbeat reply (`pong`).
    Pong,
    /// High-priority crisis escalation (`crisis_alert`).
    CrisisAlert,
    /// Queue marker for not-yet-sent payloads (`outbound`). Never on the wire.
    Outbound,
    /// Any application message type, e.g. `price_tick`.
    Other(String),
}

impl MessageType {
    /// Parse a type tag.
    pub fn parse(s: &str) -> Self {
        match s {
            message_types::PING => Self::Ping,
            message_types::PONG => Self::Pong,
            message_types::CRISIS_ALERT => Self::CrisisAlert,
            message_types::OUTBOUND => Self::Outbound,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => message_types::PING,
            Self::Pong => message_types::PONG,
            Self::CrisisAlert => message_types::CRISIS_ALERT,
            Self::Outbound => message_types::OUTBOUND,
            Self::Other(s) => s.as_str(),
        }
    }

    /// Whether this is a heartbeat probe or reply.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }

    /// Whether this tag is handled by the transport rather than subscribers.
    pub fn is_reserved(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match Self::parse(&s) {
            Self::Other(_) => Self::Other(s),
            reserved => reserved,
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Other(s) => s,
            reserved => reserved.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable message on a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Channel the message belongs to.
    pub channel: Channel,
    /// Opaque payload.
    pub data: Value,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// Optional sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// Lenient wire shape; validated into an [`Envelope`] by [`Envelope::parse`].
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    channel: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    sequence: Option<u64>,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: impl Into<MessageType>, channel: Channel, data: Value) -> Self {
        Self {
            kind: kind.into(),
            channel,
            data,
            timestamp: Utc::now(),
            sequence: None,
        }
    }

    /// Attach a sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Heartbeat probe carrying `sequence`.
    pub fn ping(channel: Channel, sequence: u64) -> Self {
        Self::new(MessageType::Ping, channel, Value::Null).with_sequence(sequence)
    }

    /// Heartbeat reply echoing `sequence` when the probe had one.
    pub fn pong(channel: Channel, sequence: Option<u64>) -> Self {
        Self {
            sequence,
            ..Self::new(MessageType::Pong, channel, Value::Null)
        }
    }

    /// Queue entry for a payload that could not be sent yet.
    pub fn outbound(channel: Channel, data: Value) -> Self {
        Self::new(MessageType::Outbound, channel, data)
    }

    /// Parse a raw text frame that arrived on `expected`.
    ///
    /// Fails on malformed JSON, missing `type`/`channel`, an unknown channel
    /// name, or a channel that differs from `expected`.
    pub fn parse(raw: &str, expected: Channel) -> AqResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(raw)
            .map_err(|e| AqError::Parse(format!("malformed envelope: {e}")))?;

        let channel: Channel = raw
            .channel
            .parse()
            .map_err(|_| AqError::Parse(format!("unknown channel {:?}", raw.channel)))?;
        if channel != expected {
            return Err(AqError::ChannelMismatch {
                expected: expected.to_string(),
                found: channel.to_string(),
            });
        }

        Ok(Self {
            kind: MessageType::from(raw.kind),
            channel,
            data: raw.data,
            timestamp: raw
                .timestamp
                .as_ref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            sequence: raw.sequence,
        })
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> AqResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Try to deserialize the payload into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Read an ISO-8601 timestamp. Values without an offset are taken as UTC.
///
/// Anything unreadable yields `None`; the caller stamps the receive time.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = match value {
        Value::String(text) => text.trim(),
        Value::Null => return None,
        other => {
            debug!(timestamp = %other, "non-string timestamp ignored");
            return None;
        }
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    debug!(timestamp = text, "unreadable timestamp, using receive time");
    None
}
