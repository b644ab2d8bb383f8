//! Application configuration management.
//!
//! Handles loading, saving, and accessing configuration for the realtime
//! transport: reconnection and heartbeat tuning, queue sizes, channel
//! endpoints, auth token, and logging. Configuration is persisted as TOML.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{AqError, AqResult};
use crate::platform;

/// Wire names of the fixed channel set, in declaration order.
pub const CHANNEL_NAMES: &[&str] = &["forecasts", "market", "notifications", "crisis", "agents"];

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Realtime transport tuning.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Channel endpoint URLs.
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Credentials passed on connect.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Realtime transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Reconnection attempts after an unclean close before the channel enters `error`.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Base backoff delay; attempt `n` waits `reconnect_delay_ms * 2^n`.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Interval between heartbeat pings.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Consecutive unanswered pings before the connection is treated as dead (0 = never).
    #[serde(default = "default_heartbeat_max_missed")]
    pub heartbeat_max_missed: u32,

    /// Default outbound queue capacity per channel.
    #[serde(default = "default_message_queue_size")]
    pub message_queue_size: usize,

    /// Per-channel outbound queue capacity overrides, keyed by channel name.
    #[serde(default)]
    pub channel_queue_sizes: HashMap<String, usize>,

    /// Whether subscribing to a disconnected channel opens it.
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// How long an idle channel stays open after its last subscriber leaves.
    #[serde(default = "default_unsubscribe_grace")]
    pub unsubscribe_grace_ms: u64,

    /// Dispatched envelopes kept per channel for late-subscriber replay.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Timeout for opening a connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Backoff jitter as a fraction of the computed delay (0.0 to 1.0).
    #[serde(default)]
    pub jitter_factor: f64,
}

/// Partial update for [`RealtimeConfig`]. Unset fields keep their value.
///
/// Accepts both snake_case and the dashboard's camelCase option names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfigUpdate {
    #[serde(default, alias = "reconnectAttempts", skip_serializing_if = "Option::is_none")]
    pub reconnect_attempts: Option<u32>,
    #[serde(default, alias = "reconnectDelay", skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,
    #[serde(default, alias = "heartbeatInterval", skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(default, alias = "heartbeatMaxMissed", skip_serializing_if = "Option::is_none")]
    pub heartbeat_max_missed: Option<u32>,
    #[serde(default, alias = "messageQueueSize", skip_serializing_if = "Option::is_none")]
    pub message_queue_size: Option<usize>,
    #[serde(default, alias = "channelQueueSizes", skip_serializing_if = "Option::is_none")]
    pub channel_queue_sizes: Option<HashMap<String, usize>>,
    #[serde(default, alias = "autoConnect", skip_serializing_if = "Option::is_none")]
    pub auto_connect: Option<bool>,
    #[serde(default, alias = "unsubscribeGrace", skip_serializing_if = "Option::is_none")]
    pub unsubscribe_grace_ms: Option<u64>,
    #[serde(default, alias = "historySize", skip_serializing_if = "Option::is_none")]
    pub history_size: Option<usize>,
    #[serde(default, alias = "connectTimeout", skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, alias = "jitterFactor", skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,
}

/// Channel endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base WebSocket URL; a channel without an override connects to `{base_url}/{channel}`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Full URL overrides keyed by channel name.
    #[serde(default)]
    pub channels: HashMap<String, String>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token appended to every channel URL. Absent means unauthenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_reconnect_attempts() -> u32 {
    constants::DEFAULT_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay() -> u64 {
    constants::DEFAULT_RECONNECT_DELAY_MS
}

fn default_heartbeat_interval() -> u64 {
    constants::DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_heartbeat_max_missed() -> u32 {
    constants::DEFAULT_HEARTBEAT_MAX_MISSED
}

fn default_message_queue_size() -> usize {
    constants::DEFAULT_MESSAGE_QUEUE_SIZE
}

fn default_unsubscribe_grace() -> u64 {
    constants::DEFAULT_UNSUBSCRIBE_GRACE_MS
}

fn default_history_size() -> usize {
    constants::DEFAULT_HISTORY_SIZE
}

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    constants::DEFAULT_WS_BASE_URL.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_max_missed: default_heartbeat_max_missed(),
            message_queue_size: default_message_queue_size(),
            channel_queue_sizes: HashMap::new(),
            auto_connect: true,
            unsubscribe_grace_ms: default_unsubscribe_grace(),
            history_size: default_history_size(),
            connect_timeout_ms: default_connect_timeout(),
            jitter_factor: 0.0,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            channels: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl RealtimeConfig {
    /// Check every value the transport depends on.
    pub fn validate(&self) -> AqResult<()> {
        if self.reconnect_delay_ms == 0 {
            return Err(AqError::Config("reconnect_delay_ms must be greater than 0".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(AqError::Config("heartbeat_interval_ms must be greater than 0".into()));
        }
        if self.message_queue_size == 0 {
            return Err(AqError::Config("message_queue_size must be greater than 0".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(AqError::Config("connect_timeout_ms must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(AqError::Config(format!(
                "jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }
        for (channel, size) in &self.channel_queue_sizes {
            ensure_known_channel(channel)?;
            if *size == 0 {
                return Err(AqError::Config(format!(
                    "queue size for channel {channel} must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Produce a validated copy with `update` applied. `self` is untouched on error.
    pub fn merged(&self, update: &RealtimeConfigUpdate) -> AqResult<Self> {
        let mut next = self.clone();
        if let Some(v) = update.reconnect_attempts {
            next.reconnect_attempts = v;
        }
        if let Some(v) = update.reconnect_delay_ms {
            next.reconnect_delay_ms = v;
        }
        if let Some(v) = update.heartbeat_interval_ms {
            next.heartbeat_interval_ms = v;
        }
        if let Some(v) = update.heartbeat_max_missed {
            next.heartbeat_max_missed = v;
        }
        if let Some(v) = update.message_queue_size {
            next.message_queue_size = v;
        }
        if let Some(ref sizes) = update.channel_queue_sizes {
            next.channel_queue_sizes
                .extend(sizes.iter().map(|(k, v)| (k.clone(), *v)));
        }
        if let Some(v) = update.auto_connect {
            next.auto_connect = v;
        }
        if let Some(v) = update.unsubscribe_grace_ms {
            next.unsubscribe_grace_ms = v;
        }
        if let Some(v) = update.history_size {
            next.history_size = v;
        }
        if let Some(v) = update.connect_timeout_ms {
            next.connect_timeout_ms = v;
        }
        if let Some(v) = update.jitter_factor {
            next.jitter_factor = v;
        }
        next.validate()?;
        Ok(next)
    }

    /// Outbound queue capacity for a channel, honoring overrides.
    pub fn queue_capacity(&self, channel: &str) -> usize {
        self.channel_queue_sizes
            .get(channel)
            .copied()
            .unwrap_or(self.message_queue_size)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn unsubscribe_grace(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl EndpointConfig {
    /// Build an endpoint config with only a base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            channels: HashMap::new(),
        }
    }

    /// The endpoint URL for a channel, before any token is attached.
    pub fn url_for(&self, channel: &str) -> String {
        match self.channels.get(channel) {
            Some(url) => url.clone(),
            None => format!("{}/{}", self.base_url.trim_end_matches('/'), channel),
        }
    }

    /// Check that the base URL and every override are usable WebSocket URLs.
    pub fn validate(&self) -> AqResult<()> {
        for channel in CHANNEL_NAMES {
            let url = url::Url::parse(&self.url_for(channel))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(AqError::Config(format!(
                    "endpoint for {channel} must use ws:// or wss://, got {}",
                    url.scheme()
                )));
            }
        }
        for channel in self.channels.keys() {
            ensure_known_channel(channel)?;
        }
        Ok(())
    }
}

fn ensure_known_channel(channel: &str) -> AqResult<()> {
    if CHANNEL_NAMES.contains(&channel) {
        Ok(())
    } else {
        Err(AqError::InvalidChannel(channel.to_string()))
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> AqResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> AqResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.realtime.validate()?;
        config.endpoints.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> AqResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> AqResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AqError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> AqResult<PathBuf> {
        Ok(platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> AqResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to a file.
    pub async fn save_to(&self, path: &Path) -> AqResult<()> {
        let config = self.inner.read().await;
        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.realtime.reconnect_attempts, 5);
        assert_eq!(config.realtime.reconnect_delay_ms, 1_000);
        assert_eq!(config.realtime.heartbeat_interval_ms, 30_000);
        assert_eq!(config.realtime.unsubscribe_grace_ms, 5_000);
        assert!(config.realtime.auto_connect);
        assert!(config.auth.token.is_none());
        assert_eq!(config.logging.level, "info");
        config.realtime.validate().unwrap();
        config.endpoints.validate().unwrap();
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = AppConfig::default();
        config.realtime.channel_queue_sizes.insert("market".into(), 500);
        config.endpoints.channels.insert("crisis".into(), "wss://alerts.example.com/crisis".into());
        config.auth.token = Some("tok".into());

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.realtime, config.realtime);
        assert_eq!(deserialized.endpoints, config.endpoints);
        assert_eq!(deserialized.auth.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [realtime]
            reconnect_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.realtime.reconnect_attempts, 2);
        assert_eq!(config.realtime.message_queue_size, 100);
        assert_eq!(config.endpoints.base_url, "ws://localhost:8000/ws");
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.realtime.history_size = 7;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.realtime.history_size, 7);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[realtime]\nmessage_queue_size = 0\n").unwrap();
        let err = AppConfig::load_from_file(&path).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_merged_applies_partial_update() {
        let base = RealtimeConfig::default();
        let update = RealtimeConfigUpdate {
            reconnect_attempts: Some(2),
            auto_connect: Some(false),
            ..Default::default()
        };
        let next = base.merged(&update).unwrap();
        assert_eq!(next.reconnect_attempts, 2);
        assert!(!next.auto_connect);
        assert_eq!(next.heartbeat_interval_ms, base.heartbeat_interval_ms);
    }

    #[test]
    fn test_update_accepts_camel_case_names() {
        let update: RealtimeConfigUpdate = serde_json::from_value(serde_json::json!({
            "reconnectAttempts": 3,
            "reconnectDelay": 250,
            "heartbeatInterval": 10000,
            "messageQueueSize": 20,
            "autoConnect": false
        }))
        .unwrap();
        let next = RealtimeConfig::default().merged(&update).unwrap();
        assert_eq!(next.reconnect_attempts, 3);
        assert_eq!(next.reconnect_delay_ms, 250);
        assert_eq!(next.heartbeat_interval_ms, 10_000);
        assert_eq!(next.message_queue_size, 20);
        assert!(!next.auto_connect);
    }

    #[test]
    fn test_merged_rejects_invalid_update() {
        let base = RealtimeConfig::default();
        let update = RealtimeConfigUpdate {
            reconnect_delay_ms: Some(0),
            ..Default::default()
        };
        assert!(base.merged(&update).is_err());

        let update = RealtimeConfigUpdate {
            jitter_factor: Some(1.5),
            ..Default::default()
        };
        assert!(base.merged(&update).is_err());

        let update = RealtimeConfigUpdate {
            channel_queue_sizes: Some(HashMap::from([("trades".to_string(), 10)])),
            ..Default::default()
        };
        assert!(matches!(
            base.merged(&update),
            Err(AqError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_queue_capacity_override() {
        let mut config = RealtimeConfig::default();
        config.channel_queue_sizes.insert("market".into(), 500);
        assert_eq!(config.queue_capacity("market"), 500);
        assert_eq!(config.queue_capacity("agents"), 100);
    }

    #[test]
    fn test_endpoint_urls() {
        let mut endpoints = EndpointConfig::with_base_url("wss://api.example.com/ws/");
        assert_eq!(endpoints.url_for("market"), "wss://api.example.com/ws/market");

        endpoints
            .channels
            .insert("crisis".into(), "wss://alerts.example.com/stream".into());
        assert_eq!(endpoints.url_for("crisis"), "wss://alerts.example.com/stream");
        endpoints.validate().unwrap();
    }

    #[test]
    fn test_endpoint_validation() {
        let endpoints = EndpointConfig::with_base_url("http://api.example.com");
        assert!(endpoints.validate().is_err());

        let mut endpoints = EndpointConfig::default();
        endpoints.channels.insert("trades".into(), "ws://x/trades".into());
        assert!(matches!(endpoints.validate(), Err(AqError::InvalidChannel(_))));
    }
}
