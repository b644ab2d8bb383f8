//! Aequitas Realtime CLI - command-line front end for the channel transport.
//!
//! Subscribes to live channels from the terminal, sends one-off messages,
//! and inspects or edits the configuration. Useful for headless operation,
//! scripting, and debugging a realtime backend.

mod alerts;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use aq_core::config::{AppConfig, ConfigHandle};
use aq_core::error::AqResult;
use aq_core::logging;

/// Aequitas Realtime - multiplexed channel client.
#[derive(Parser)]
#[command(
    name = "aequitas-rt",
    version,
    about = "Aequitas realtime channel client",
    long_about = "A command-line client for the Aequitas realtime channels.\n\
                   Listen to forecasts, market, notifications, crisis and agent streams, \
                   or push messages onto them."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to channels and print everything that arrives.
    Listen {
        /// Channels to listen on (repeatable). Defaults to all channels.
        #[arg(short = 'c', long = "channel")]
        channels: Vec<String>,
        /// Auth token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Base WebSocket URL (overrides config).
        #[arg(short, long)]
        url: Option<String>,
        /// Replay recent history to the listener as it subscribes.
        #[arg(long)]
        replay: bool,
        /// Do not raise desktop notifications.
        #[arg(long)]
        no_desktop: bool,
    },
    /// Send one message on a channel.
    Send {
        /// Target channel.
        #[arg(short = 'c', long = "channel")]
        channel: String,
        /// Message type tag.
        #[arg(short = 't', long = "type", default_value = "message")]
        kind: String,
        /// JSON payload placed in the envelope's `data` field.
        data: String,
        /// Auth token (overrides config).
        #[arg(long)]
        token: Option<String>,
        /// How long to wait for the channel to open.
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
    /// List channels and their endpoint URLs.
    Channels,
    /// Inspect and edit the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> AqResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => AppConfig::default_config_path()?,
    };
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = logging::init_logging(&log_level, &log_dir, config.logging.json_output)?;

    info!("Aequitas realtime CLI v{}", aq_core::constants::APP_VERSION);
    debug!(config = %config_path.display(), "configuration loaded");

    let config_handle = ConfigHandle::new(config);

    // Dispatch to command handlers
    match cli.command {
        Commands::Listen {
            channels,
            token,
            url,
            replay,
            no_desktop,
        } => {
            let opts = commands::listen::ListenOptions {
                channels,
                token,
                url,
                replay,
                desktop: !no_desktop,
            };
            commands::listen::run(config_handle, opts, cli.format).await
        }
        Commands::Send {
            channel,
            kind,
            data,
            token,
            wait_ms,
        } => {
            let opts = commands::send::SendOptions {
                channel,
                kind,
                data,
                token,
                wait_ms,
            };
            commands::send::run(config_handle, opts, cli.format).await
        }
        Commands::Channels => commands::channels::run(config_handle, cli.format).await,
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
