//! CLI command implementations.

pub mod channels;
pub mod config;
pub mod listen;
pub mod send;

use std::sync::Arc;

use aq_core::config::AppConfig;
use aq_core::error::AqResult;
use aq_realtime::{Channel, ChannelManager, WsConnector};

use crate::alerts::{DesktopNotifier, TerminalCrisisHandler};

/// Parse channel names from the command line. An empty list means every channel.
pub fn parse_channels(names: &[String]) -> AqResult<Vec<Channel>> {
    if names.is_empty() {
        return Ok(Channel::ALL.to_vec());
    }
    let mut channels = Vec::with_capacity(names.len());
    for name in names {
        let channel: Channel = name.trim().to_lowercase().parse()?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    Ok(channels)
}

/// Helper to create a channel manager wired to the terminal collaborators.
pub fn build_manager(config: &AppConfig, desktop: bool) -> AqResult<ChannelManager> {
    let manager = ChannelManager::from_app_config(config, Arc::new(WsConnector::new()))?
        .with_crisis_handler(Arc::new(TerminalCrisisHandler::new()))
        .with_notifier(Arc::new(DesktopNotifier::new(desktop)));
    Ok(manager)
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Truncate a string to a maximum number of characters, appending an ellipsis if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}

/// Mask a secret for display, keeping only the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(8))
}
