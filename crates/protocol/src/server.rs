//! Server records served by the lifecycle API.
//!
//! Only the fields the console needs are modelled; unknown fields in the API
//! response are ignored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a hosted game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Out-of-band provisioning; no console channel exists yet.
    Installing,
    /// Process is not running.
    Stopped,
    /// Process launched, booting.
    Starting,
    /// Process is up and accepting commands.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Installation failed or the container crashed.
    Error,
    /// Administratively disabled.
    Suspended,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerStatus {
    /// Returns whether the console channel should be kept open in this status.
    pub fn is_live(&self) -> bool {
        matches!(self, ServerStatus::Starting | ServerStatus::Running)
    }

    /// Returns the badge label shown next to the server name.
    pub fn label(&self) -> &'static str {
        match self {
            ServerStatus::Installing => "Installing",
            ServerStatus::Stopped => "Stopped",
            ServerStatus::Starting => "Starting",
            ServerStatus::Running => "Online",
            ServerStatus::Stopping => "Stopping",
            ServerStatus::Error => "Error",
            ServerStatus::Unknown => "Unknown",
            ServerStatus::Suspended => "Suspended",
        }
    }

    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Installing => "installing",
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Error => "error",
            ServerStatus::Suspended => "suspended",
            ServerStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server as returned by `GET /api/servers/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Server identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Current lifecycle status.
    pub status: ServerStatus,
    /// Creation time; the reference point for install progress.
    pub created_at: DateTime<Utc>,
    /// Game version.
    #[serde(default)]
    pub mc_version: Option<String>,
    /// Public game port.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Live resource usage from `GET /api/servers/{id}/metrics`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerMetrics {
    pub cpu_percent: f64,
    pub ram_used_mb: u64,
    pub ram_limit_mb: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub players_online: u32,
    pub player_names: Vec<String>,
}

impl ServerMetrics {
    /// RAM usage as a whole percentage of the limit.
    pub fn ram_percent(&self) -> u64 {
        if self.ram_limit_mb == 0 {
            return 0;
        }
        ((self.ram_used_mb as f64 / self.ram_limit_mb as f64) * 100.0).round() as u64
    }
}
