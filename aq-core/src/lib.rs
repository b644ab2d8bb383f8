//! Aequitas Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other Aequitas crates:
//! - Application configuration (realtime transport, endpoints, auth, logging)
//! - Global error type covering all transport and configuration failures
//! - Structured logging with tracing
//! - Platform directory resolution
//! - Common constants and defaults

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle, EndpointConfig, RealtimeConfig, RealtimeConfigUpdate};
pub use error::{AqError, AqResult};
pub use logging::init_logging;
