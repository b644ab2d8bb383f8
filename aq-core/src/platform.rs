//! OS-specific directories for configuration and data.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{AqError, AqResult};

/// Directory holding `config.toml`.
///
/// `~/.config/Aequitas` on Linux, `~/Library/Application Support/Aequitas`
/// on macOS, `%APPDATA%\Aequitas` on Windows.
pub fn config_dir() -> AqResult<PathBuf> {
    app_dir(dirs::config_dir(), "config")
}

/// Directory for logs and other runtime data.
pub fn data_dir() -> AqResult<PathBuf> {
    app_dir(dirs::data_dir(), "data")
}

fn app_dir(base: Option<PathBuf>, kind: &str) -> AqResult<PathBuf> {
    base.map(|base| base.join(APP_NAME))
        .ok_or_else(|| AqError::Config(format!("could not determine {kind} directory")))
}
