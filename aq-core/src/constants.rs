//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Aequitas";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default WebSocket base URL; each channel lives at `{base}/{channel}`.
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000/ws";

/// Query parameter carrying the bearer token on connect.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Default maximum reconnection attempts before a channel enters `error`.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base backoff delay in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Unanswered pings before a connection is treated as dead.
pub const DEFAULT_HEARTBEAT_MAX_MISSED: u32 = 3;

/// Default per-channel outbound queue capacity.
pub const DEFAULT_MESSAGE_QUEUE_SIZE: usize = 100;

/// Default grace period before an idle channel is disconnected.
pub const DEFAULT_UNSUBSCRIBE_GRACE_MS: u64 = 5_000;

/// Default number of dispatched envelopes kept per channel for replay.
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// Default timeout for opening a connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// WebSocket close codes the transport cares about.
pub mod close_codes {
    /// Deliberate, clean closure.
    pub const NORMAL: u16 = 1000;
    /// Peer sent a close frame without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Closed without a close frame (network drop, failed open, dead heartbeat).
    pub const ABNORMAL: u16 = 1006;

    /// Whether a close code counts as a clean, deliberate closure.
    pub fn is_clean(code: u16) -> bool {
        code == NORMAL
    }
}

/// Reserved envelope `type` values handled by the transport itself.
pub mod message_types {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const CRISIS_ALERT: &str = "crisis_alert";
    pub const OUTBOUND: &str = "outbound";

    /// All reserved message types.
    pub const RESERVED: &[&str] = &[PING, PONG, CRISIS_ALERT, OUTBOUND];
}
