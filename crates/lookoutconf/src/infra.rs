//! Infrastructure configuration - where things live and how to reach them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for Lookout state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for persisted operator preferences (joined sessions, active tab).
    /// Default: ~/.local/share/lookout
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_local_dir().join("lookout"))
            .unwrap_or_else(|| PathBuf::from(".local/share/lookout"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
        }
    }
}

/// Remote session directory (the REST inventory of running feeds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the session directory API.
    /// Default: http://127.0.0.1:8000
    #[serde(default = "DirectoryConfig::default_base_url")]
    pub base_url: String,

    /// How often the remote inventory is re-fetched.
    #[serde(default = "DirectoryConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Keep-alive interval for joined sessions.
    #[serde(default = "DirectoryConfig::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Per-request timeout.
    #[serde(default = "DirectoryConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl DirectoryConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:8000".to_string()
    }

    fn default_poll_interval_ms() -> u64 {
        5_000
    }

    fn default_heartbeat_interval_ms() -> u64 {
        60_000
    }

    fn default_request_timeout_ms() -> u64 {
        10_000
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Empty disables export (logs still go to stderr).
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log level or full EnvFilter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}
