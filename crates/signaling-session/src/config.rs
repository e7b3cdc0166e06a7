//! Signaling session configuration.
//!
//! Configuration is loaded from environment variables, with defaults for
//! everything. Room keys are never part of the configuration.

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default signaling server port.
pub const DEFAULT_PORT: u16 = 8888;

/// Default deadline for connect/join/lock/unlock replies, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default session mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Signaling session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Port used by `connect_to_host` (default: 8888).
    pub default_port: u16,

    /// TLS flag used by `connect_to_host` (default: false).
    pub default_secure: bool,

    /// Whether the local stream includes video (default: true).
    pub allow_video: bool,

    /// Deadline for round-trip replies (default: 10s).
    pub request_timeout: Duration,

    /// Session actor mailbox size (default: 256).
    pub mailbox_capacity: usize,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            default_secure: false,
            allow_video: true,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl SessionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let default_port = parse_var(vars, "SIGNALING_DEFAULT_PORT")?.unwrap_or(DEFAULT_PORT);
        let default_secure = parse_bool(vars, "SIGNALING_DEFAULT_SECURE")?.unwrap_or(false);
        let allow_video = parse_bool(vars, "SIGNALING_ALLOW_VIDEO")?.unwrap_or(true);

        let request_timeout_ms = parse_var(vars, "SIGNALING_REQUEST_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_REQUEST_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let mailbox_capacity = parse_var(vars, "SIGNALING_MAILBOX_CAPACITY")?
            .unwrap_or(DEFAULT_MAILBOX_CAPACITY);
        if mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "SIGNALING_MAILBOX_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let log_level = vars
            .get("SIGNALING_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let json_logs = parse_bool(vars, "SIGNALING_JSON_LOGS")?.unwrap_or(false);

        Ok(Self {
            default_port,
            default_secure,
            allow_video,
            request_timeout: Duration::from_millis(request_timeout_ms),
            mailbox_capacity,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    vars.get(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{name}: '{raw}'")))
        })
        .transpose()
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<Option<bool>, ConfigError> {
    vars.get(name)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!("{name}: '{raw}'"))),
        })
        .transpose()
}
