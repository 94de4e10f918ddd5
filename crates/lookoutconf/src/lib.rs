//! Configuration loading for Lookout.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`paths`, `directory`, `telemetry`): where state lives
//!   and how the remote services are reached.
//!
//! - **Tuning** (`transport`, `channel`, `tracker`, `clock`): knobs that seed
//!   the live engine's timers and thresholds.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/lookout/config.toml` (system)
//! 2. `~/.config/lookout/config.toml` (user)
//! 3. `./lookout.toml` (local override, replaced by an explicit path)
//! 4. Environment variables (`LOOKOUT_*`)
//!
//! # Example Config
//!
//! ```toml
//! [directory]
//! base_url = "http://bridge-gpu:8000"
//!
//! [channel]
//! detections_url = "ws://bridge-gpu:8000/sessions/{session}/detections"
//!
//! [transport]
//! first_frame_timeout_ms = 6000
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! ```

pub mod infra;
pub mod loader;
pub mod tuning;

pub use infra::{DirectoryConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use tuning::{ChannelConfig, ClockConfig, TrackerConfig, TransportConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Lookout configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LookoutConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub clock: ClockConfig,
}

impl LookoutConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file replacing `./lookout.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize the effective config back to TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::from("# Lookout Configuration\n\n");
        // Every field is a plain scalar, serialization cannot fail.
        output.push_str(&toml::to_string_pretty(self).unwrap_or_default());
        output
    }
}
