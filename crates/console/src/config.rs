//! Configuration management for the HostPanel console.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/hostpanel/console.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ReconnectPolicy;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("base_url must start with http:// or https://, got {0}")]
    InvalidBaseUrl(String),

    #[error("poll_interval_secs must be greater than 0")]
    InvalidPollInterval,

    #[error("request_timeout_secs must be greater than 0")]
    InvalidRequestTimeout,

    #[error("initial_backoff_ms must be greater than 0")]
    InvalidInitialBackoff,

    #[error("initial_backoff_ms ({initial}) must not exceed max_backoff_ms ({max})")]
    InvalidBackoffRange { initial: u64, max: u64 },

    #[error("scrollback_step must be greater than 0")]
    InvalidScrollbackStep,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Lifecycle API settings.
    pub api: ApiConfig,

    /// Credential source.
    pub auth: AuthConfig,

    /// Console client settings.
    pub console: ConsoleConfig,

    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

/// Lifecycle API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the panel API; the console channel address is derived
    /// from it.
    pub base_url: String,

    /// Seconds between status polls.
    pub poll_interval_secs: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Where the bearer credential comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Inline credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// File holding the credential, re-read on every use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
}

/// Console client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for client logs and exported console output.
    pub data_dir: PathBuf,

    /// Lines moved per PageUp/PageDown.
    pub scrollback_step: usize,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_backoff_ms: u64,

    /// Upper bound for the doubling delay.
    pub max_backoff_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            poll_interval_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: default_data_dir(),
            scrollback_step: 10,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: crate::session::backoff::INITIAL_BACKOFF_MS,
            max_backoff_ms: crate::session::backoff::MAX_BACKOFF_MS,
        }
    }
}

impl ApiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ReconnectConfig {
    /// Builds the backoff policy for a new session.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostpanel")
        .join("console.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostpanel")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - HOSTPANEL_API_URL: Override the API base URL
    /// - HOSTPANEL_TOKEN: Override the inline credential
    /// - HOSTPANEL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HOSTPANEL_API_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding base_url from environment: {}", url);
                self.api.base_url = url;
            }
        }

        if let Ok(token) = std::env::var("HOSTPANEL_TOKEN") {
            if !token.is_empty() {
                tracing::info!("Using credential from HOSTPANEL_TOKEN");
                self.auth.token = Some(token);
            }
        }

        if let Ok(level) = std::env::var("HOSTPANEL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.console.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.api.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(url.clone()));
        }

        if self.api.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidRequestTimeout);
        }

        if self.reconnect.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidInitialBackoff);
        }

        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(ConfigError::InvalidBackoffRange {
                initial: self.reconnect.initial_backoff_ms,
                max: self.reconnect.max_backoff_ms,
            });
        }

        if self.console.scrollback_step == 0 {
            return Err(ConfigError::InvalidScrollbackStep);
        }

        let level = self.console.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.console.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
