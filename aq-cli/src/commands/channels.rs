//! Channels command - list channels and where they connect.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

use aq_core::config::ConfigHandle;
use aq_core::error::AqResult;
use aq_realtime::transport::endpoint_url;
use aq_realtime::Channel;

use crate::OutputFormat;

/// Run the channels command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> AqResult<()> {
    let cfg = config.read().await;
    let authenticated = cfg.auth.token.as_deref().is_some_and(|t| !t.is_empty());

    let mut rows = Vec::with_capacity(Channel::ALL.len());
    for channel in Channel::ALL {
        // Token left out so it never lands in terminal scrollback.
        let url = endpoint_url(&cfg.endpoints, channel, None)?;
        let overridden = cfg.endpoints.channels.contains_key(channel.as_str());
        let queue = cfg.realtime.queue_capacity(channel.as_str());
        rows.push((channel, url, overridden, queue));
    }

    match format {
        OutputFormat::Json => {
            let channels: Vec<_> = rows
                .iter()
                .map(|(channel, url, overridden, queue)| {
                    serde_json::json!({
                        "channel": channel,
                        "url": url,
                        "override": overridden,
                        "queue_capacity": queue,
                    })
                })
                .collect();
            let json = serde_json::json!({
                "authenticated": authenticated,
                "channels": channels,
            });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(vec!["Channel", "Endpoint", "Queue"]);
            for (channel, url, overridden, queue) in &rows {
                let endpoint = if *overridden {
                    format!("{url} (override)")
                } else {
                    url.clone()
                };
                table.add_row(vec![channel.to_string(), endpoint, queue.to_string()]);
            }

            println!("{table}");
            println!(
                "  Auth token: {}",
                if authenticated { "configured" } else { "none" }
            );
        }
    }

    Ok(())
}
