//! Config commands.

use std::path::Path;

use clap::Subcommand;
use console::style;

use aq_core::config::{AppConfig, ConfigHandle, RealtimeConfigUpdate, CHANNEL_NAMES};
use aq_core::error::AqResult;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all settings.
    Show,
    /// Print the configuration file path.
    Path,
    /// Write a default configuration file if none exists.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Get a specific setting value by key path.
    Get {
        /// Setting key path (e.g., "realtime.reconnect_attempts", "endpoints.base_url").
        key: String,
    },
    /// Set a specific setting value by key path.
    Set {
        /// Setting key path (e.g., "realtime.heartbeat_interval_ms", "auth.token").
        key: String,
        /// New value.
        value: String,
    },
}

/// Resolve a dot-separated key path to a value from the config.
fn get_setting_value(cfg: &AppConfig, key: &str) -> Option<String> {
    let rt = &cfg.realtime;
    match key {
        "realtime.reconnect_attempts" => Some(rt.reconnect_attempts.to_string()),
        "realtime.reconnect_delay_ms" => Some(rt.reconnect_delay_ms.to_string()),
        "realtime.heartbeat_interval_ms" => Some(rt.heartbeat_interval_ms.to_string()),
        "realtime.heartbeat_max_missed" => Some(rt.heartbeat_max_missed.to_string()),
        "realtime.message_queue_size" => Some(rt.message_queue_size.to_string()),
        "realtime.auto_connect" => Some(rt.auto_connect.to_string()),
        "realtime.unsubscribe_grace_ms" => Some(rt.unsubscribe_grace_ms.to_string()),
        "realtime.history_size" => Some(rt.history_size.to_string()),
        "realtime.connect_timeout_ms" => Some(rt.connect_timeout_ms.to_string()),
        "realtime.jitter_factor" => Some(rt.jitter_factor.to_string()),
        "endpoints.base_url" => Some(cfg.endpoints.base_url.clone()),
        "auth.token" => Some(
            cfg.auth
                .token
                .as_deref()
                .map(super::mask_secret)
                .unwrap_or_default(),
        ),
        "logging.level" => Some(cfg.logging.level.clone()),
        "logging.directory" => Some(cfg.logging.directory.clone()),
        "logging.json_output" => Some(cfg.logging.json_output.to_string()),
        _ => {
            if let Some(channel) = key.strip_prefix("realtime.channel_queue_sizes.") {
                return CHANNEL_NAMES
                    .contains(&channel)
                    .then(|| rt.queue_capacity(channel).to_string());
            }
            if let Some(channel) = key.strip_prefix("endpoints.channels.") {
                return CHANNEL_NAMES
                    .contains(&channel)
                    .then(|| cfg.endpoints.url_for(channel));
            }
            None
        }
    }
}

fn parse<T: std::str::FromStr>(value: &str, expected: &str) -> Result<T, String> {
    value.trim().parse().map_err(|_| format!("expected {expected}"))
}

/// Apply a value to a dot-separated key path on the config.
fn set_setting_value(cfg: &mut AppConfig, key: &str, value: &str) -> Result<(), String> {
    if let Some(field) = key.strip_prefix("realtime.") {
        let mut update = RealtimeConfigUpdate::default();
        match field {
            "reconnect_attempts" => update.reconnect_attempts = Some(parse(value, "an integer")?),
            "reconnect_delay_ms" => update.reconnect_delay_ms = Some(parse(value, "an integer")?),
            "heartbeat_interval_ms" => {
                update.heartbeat_interval_ms = Some(parse(value, "an integer")?)
            }
            "heartbeat_max_missed" => {
                update.heartbeat_max_missed = Some(parse(value, "an integer")?)
            }
            "message_queue_size" => update.message_queue_size = Some(parse(value, "an integer")?),
            "auto_connect" => update.auto_connect = Some(parse(value, "true/false")?),
            "unsubscribe_grace_ms" => {
                update.unsubscribe_grace_ms = Some(parse(value, "an integer")?)
            }
            "history_size" => update.history_size = Some(parse(value, "an integer")?),
            "connect_timeout_ms" => update.connect_timeout_ms = Some(parse(value, "an integer")?),
            "jitter_factor" => update.jitter_factor = Some(parse(value, "a number")?),
            other => match other.strip_prefix("channel_queue_sizes.") {
                Some(channel) => {
                    let size = parse(value, "an integer")?;
                    update.channel_queue_sizes =
                        Some(std::iter::once((channel.to_string(), size)).collect());
                }
                None => return Err(format!("unknown setting key: {key}")),
            },
        }
        cfg.realtime = cfg.realtime.merged(&update).map_err(|e| e.to_string())?;
        return Ok(());
    }

    match key {
        "endpoints.base_url" => {
            let mut endpoints = cfg.endpoints.clone();
            endpoints.base_url = value.trim().trim_end_matches('/').to_string();
            endpoints.validate().map_err(|e| e.to_string())?;
            cfg.endpoints = endpoints;
        }
        "auth.token" => {
            let token = value.trim();
            cfg.auth.token = (!token.is_empty()).then(|| token.to_string());
        }
        "logging.level" => {
            let v = value.to_lowercase();
            if !["trace", "debug", "info", "warn", "error"].contains(&v.as_str()) {
                return Err("expected one of: trace, debug, info, warn, error".to_string());
            }
            cfg.logging.level = v;
        }
        "logging.directory" => {
            cfg.logging.directory = value.trim().to_string();
        }
        "logging.json_output" => {
            cfg.logging.json_output = parse(value, "true/false")?;
        }
        _ => match key.strip_prefix("endpoints.channels.") {
            Some(channel) => {
                let mut endpoints = cfg.endpoints.clone();
                if value.trim().is_empty() {
                    endpoints.channels.remove(channel);
                } else {
                    endpoints
                        .channels
                        .insert(channel.to_string(), value.trim().to_string());
                }
                endpoints.validate().map_err(|e| e.to_string())?;
                cfg.endpoints = endpoints;
            }
            None => return Err(format!("unknown setting key: {key}")),
        },
    }
    Ok(())
}

fn print_settings_text(cfg: &AppConfig) {
    let rt = &cfg.realtime;
    println!("{}", style("Realtime").bold().underlined());
    println!("  realtime.reconnect_attempts       {}", rt.reconnect_attempts);
    println!("  realtime.reconnect_delay_ms       {}", rt.reconnect_delay_ms);
    println!("  realtime.heartbeat_interval_ms    {}", rt.heartbeat_interval_ms);
    println!("  realtime.heartbeat_max_missed     {}", rt.heartbeat_max_missed);
    println!("  realtime.message_queue_size       {}", rt.message_queue_size);
    println!("  realtime.auto_connect             {}", rt.auto_connect);
    println!("  realtime.unsubscribe_grace_ms     {}", rt.unsubscribe_grace_ms);
    println!("  realtime.history_size             {}", rt.history_size);
    println!("  realtime.connect_timeout_ms       {}", rt.connect_timeout_ms);
    println!("  realtime.jitter_factor            {}", rt.jitter_factor);
    let mut overrides: Vec<_> = rt.channel_queue_sizes.iter().collect();
    overrides.sort();
    for (channel, size) in overrides {
        println!("  realtime.channel_queue_sizes.{channel:<13} {size}");
    }

    println!();
    println!("{}", style("Endpoints").bold().underlined());
    println!("  endpoints.base_url                {}", cfg.endpoints.base_url);
    let mut channels: Vec<_> = cfg.endpoints.channels.iter().collect();
    channels.sort();
    for (channel, url) in channels {
        println!("  endpoints.channels.{channel:<14} {url}");
    }

    println!();
    println!("{}", style("Auth").bold().underlined());
    println!(
        "  auth.token                        {}",
        cfg.auth
            .token
            .as_deref()
            .map(super::mask_secret)
            .unwrap_or_else(|| "(none)".to_string())
    );

    println!();
    println!("{}", style("Logging").bold().underlined());
    println!("  logging.level                     {}", cfg.logging.level);
    println!("  logging.directory                 {}", cfg.logging.directory);
    println!("  logging.json_output               {}", cfg.logging.json_output);
}

fn settings_json(cfg: &AppConfig) -> serde_json::Value {
    serde_json::json!({
        "realtime": cfg.realtime,
        "endpoints": cfg.endpoints,
        "auth": {
            "token": cfg.auth.token.as_deref().map(super::mask_secret),
        },
        "logging": cfg.logging,
    })
}

pub async fn run(
    config: ConfigHandle,
    path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> AqResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.read().await;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings_json(&cfg)).unwrap_or_default());
                }
                OutputFormat::Text => {
                    print_settings_text(&cfg);
                }
            }
        }
        ConfigAction::Path => match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "path": path.display().to_string(), "exists": path.exists() })
                );
            }
            OutputFormat::Text => println!("{}", path.display()),
        },
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!(
                    "{} {} already exists (use --force to overwrite)",
                    style("SKIP").yellow().bold(),
                    path.display()
                );
                return Ok(());
            }
            AppConfig::default().save_to_file(path)?;
            println!(
                "{} Default configuration written to {}",
                style("OK").green().bold(),
                path.display()
            );
        }
        ConfigAction::Get { key } => {
            let cfg = config.read().await;
            match get_setting_value(&cfg, &key) {
                Some(value) => match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::json!({ "key": key, "value": value }));
                    }
                    OutputFormat::Text => {
                        println!("{} = {}", key, value);
                    }
                },
                None => {
                    println!(
                        "{} Unknown setting key: {}",
                        style("ERROR").red().bold(),
                        key
                    );
                    println!("  Use `aequitas-rt config show` to see available keys.");
                }
            }
        }
        ConfigAction::Set { key, value } => {
            {
                let mut cfg = config.write().await;
                if let Err(e) = set_setting_value(&mut cfg, &key, &value) {
                    println!(
                        "{} Failed to set {}: {}",
                        style("ERROR").red().bold(),
                        key,
                        e
                    );
                    return Ok(());
                }
            }
            config.save_to(path).await?;

            let shown = if key == "auth.token" {
                super::mask_secret(&value)
            } else {
                value
            };
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "key": key, "value": shown, "saved": true }));
                }
                OutputFormat::Text => {
                    println!("{} {} = {}", style("SET").green().bold(), key, shown);
                }
            }
        }
    }

    Ok(())
}
