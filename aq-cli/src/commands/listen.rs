//! Listen command - subscribe to channels and stream what arrives.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;
use tracing::info;

use aq_core::config::ConfigHandle;
use aq_core::error::AqResult;
use aq_realtime::{
    Channel, ChannelManager, ConnectionState, Envelope, StatsSnapshot, SubscribeOptions,
};

use crate::OutputFormat;

/// Options for the listen command.
pub struct ListenOptions {
    pub channels: Vec<String>,
    pub token: Option<String>,
    pub url: Option<String>,
    pub replay: bool,
    pub desktop: bool,
}

/// Run the listen command.
pub async fn run(config: ConfigHandle, opts: ListenOptions, format: OutputFormat) -> AqResult<()> {
    let channels = super::parse_channels(&opts.channels)?;

    let mut cfg = config.read().await.clone();
    if let Some(url) = opts.url {
        cfg.endpoints.base_url = url;
    }
    if opts.token.is_some() {
        cfg.auth.token = opts.token;
    }
    let manager = super::build_manager(&cfg, opts.desktop)?;

    if format == OutputFormat::Text {
        let names: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
        println!(
            "{} Listening on {} (Ctrl+C to stop)",
            style("[aequitas]").bold().dim(),
            style(names.join(", ")).cyan()
        );
    }

    let observer = manager.on_status_change(move |channel, state| print_status(channel, state, format));

    let mut subscriptions = Vec::with_capacity(channels.len());
    for &channel in &channels {
        let options = listen_options(channel, opts.replay, format);
        subscriptions.push(manager.subscribe(options).await);

        // Subscribing only opens the channel when auto_connect is on.
        if !cfg.realtime.auto_connect {
            manager.connect(channel).await;
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if format == OutputFormat::Text {
                println!("\n  Disconnecting...");
            }
        }
        _ = all_failed(&manager, &channels) => {
            if format == OutputFormat::Text {
                println!(
                    "  {} Every channel gave up reconnecting.",
                    style("ERROR").red().bold()
                );
            }
        }
    }

    for subscription in subscriptions {
        subscription.unsubscribe().await;
    }
    manager.disconnect_all().await;
    observer.unregister();

    let stats = manager.stats();
    info!(
        received = stats.messages_received,
        sent = stats.messages_sent,
        reconnects = stats.reconnects,
        "listen session finished"
    );
    print_stats(&stats, format);
    Ok(())
}

/// Subscription that prints every envelope on `channel`.
fn listen_options(channel: Channel, replay: bool, format: OutputFormat) -> SubscribeOptions {
    SubscribeOptions::new(channel, move |envelope| {
        print_envelope(envelope, format);
        Ok(())
    })
    .with_replay(replay)
}

/// Resolve once every listed channel has exhausted its reconnection attempts.
async fn all_failed(manager: &ChannelManager, channels: &[Channel]) {
    for &channel in channels {
        let mut rx = manager.state_receiver(channel);
        if rx.wait_for(|s| *s == ConnectionState::Error).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn print_envelope(envelope: &Envelope, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(envelope).unwrap_or_default());
        }
        OutputFormat::Text => {
            let payload = super::truncate(&envelope.data.to_string(), 100);
            println!(
                "  {} {:<13} {} {}",
                style(envelope.timestamp.format("%H:%M:%S%.3f")).dim(),
                style(envelope.channel.as_str()).cyan(),
                style(format!("[{}]", envelope.kind)).bold(),
                payload
            );
        }
    }
}

fn print_status(channel: Channel, state: ConnectionState, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "event": "status", "channel": channel, "state": state })
            );
        }
        OutputFormat::Text => {
            let label = format!("{state}");
            let label = match state {
                ConnectionState::Connected => style(label).green().bold(),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    style(label).yellow()
                }
                ConnectionState::Error => style(label).red().bold(),
                ConnectionState::Disconnected => style(label).dim(),
            };
            println!("  {} {:<13} {}", style("*").dim(), channel.as_str(), label);
        }
    }
}

fn print_stats(stats: &StatsSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(stats).unwrap_or_default());
        }
        OutputFormat::Text => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(vec!["Metric", "Value"]);
            table.add_row(vec!["Messages received".to_string(), stats.messages_received.to_string()]);
            table.add_row(vec!["Messages sent".to_string(), stats.messages_sent.to_string()]);
            table.add_row(vec!["Bytes received".to_string(), super::format_bytes(stats.bytes_received)]);
            table.add_row(vec!["Bytes sent".to_string(), super::format_bytes(stats.bytes_sent)]);
            table.add_row(vec!["Reconnects".to_string(), stats.reconnects.to_string()]);
            table.add_row(vec!["Errors".to_string(), stats.errors.to_string()]);
            table.add_row(vec![
                "Latency".to_string(),
                stats
                    .latency_ms
                    .map(|ms| format!("{ms} ms"))
                    .unwrap_or_else(|| "-".to_string()),
            ]);

            println!();
            println!("{table}");
        }
    }
}
