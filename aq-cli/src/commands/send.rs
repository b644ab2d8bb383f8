//! Send command - push one message onto a channel.

use std::time::Duration;

use console::style;
use serde_json::Value;
use tracing::{debug, warn};

use aq_core::config::ConfigHandle;
use aq_core::error::{AqError, AqResult};
use aq_realtime::{Channel, ConnectionState, Envelope};

use crate::OutputFormat;

/// Options for the send command.
pub struct SendOptions {
    pub channel: String,
    pub kind: String,
    pub data: String,
    pub token: Option<String>,
    pub wait_ms: u64,
}

/// Run the send command.
pub async fn run(config: ConfigHandle, opts: SendOptions, format: OutputFormat) -> AqResult<()> {
    let channel: Channel = opts.channel.trim().to_lowercase().parse()?;
    let data: Value = serde_json::from_str(&opts.data)
        .map_err(|e| AqError::Parse(format!("payload is not valid JSON: {e}")))?;
    let envelope = Envelope::new(opts.kind.as_str(), channel, data);
    if envelope.kind.is_reserved() {
        return Err(AqError::Config(format!(
            "message type '{}' is reserved for the transport",
            envelope.kind
        )));
    }

    let mut cfg = config.read().await.clone();
    if opts.token.is_some() {
        cfg.auth.token = opts.token;
    }
    let manager = super::build_manager(&cfg, false)?;

    // Queued until the channel opens, then flushed.
    let sent_now = manager.send(channel, &envelope).await;
    debug!(%channel, sent_now, "envelope handed to transport");
    manager.connect(channel).await;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(opts.wait_ms);
    let delivered = loop {
        if manager.queued(channel).await == 0 {
            break true;
        }
        if manager.status(channel) == ConnectionState::Error
            || tokio::time::Instant::now() >= deadline
        {
            break false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    };

    manager.disconnect(channel).await;
    let stats = manager.stats();
    if !delivered {
        warn!(%channel, "message was not delivered before the deadline");
    }

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "channel": channel,
                    "type": envelope.kind,
                    "delivered": delivered,
                    "bytes_sent": stats.bytes_sent,
                })
            );
        }
        OutputFormat::Text => {
            if delivered {
                println!(
                    "{} Sent [{}] on {} ({})",
                    style("OK").green().bold(),
                    envelope.kind,
                    style(channel.as_str()).cyan(),
                    super::format_bytes(stats.bytes_sent)
                );
            } else {
                println!(
                    "{} Could not deliver [{}] on {} within {} ms",
                    style("FAIL").red().bold(),
                    envelope.kind,
                    channel,
                    opts.wait_ms
                );
            }
        }
    }

    if delivered {
        Ok(())
    } else {
        Err(AqError::SocketDisconnected)
    }
}
