use crate::channel::ChannelConfig;
use crate::session::DEFAULT_DISCOVERY_WINDOW;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: ChannelConfig,
    /// Seconds the device has to acknowledge `DISCOVER`.
    pub discovery_window_secs: f32,
    /// Handshake attempts before giving up. Each failed attempt is retried
    /// from scratch.
    pub discovery_attempts: u32,
    /// Scheduler frequency in Hz.
    pub tick_hz: f32,
    /// Talk to [`crate::sim::SimulatedDevice`] instead of a serial port.
    pub simulate: bool,
    pub sinks: SinkConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: ChannelConfig::default(),
            discovery_window_secs: DEFAULT_DISCOVERY_WINDOW.as_secs_f32(),
            discovery_attempts: 1,
            tick_hz: 60.0,
            simulate: false,
            sinks: SinkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub host: String,
    pub blender: bool,
    pub visualizer: bool,
    pub blender_port: u16,
    pub viz_port: u16,
    /// Echo every orientation to stdout.
    pub stdout: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            blender: false,
            visualizer: false,
            blender_port: 65432,
            viz_port: 65433,
            stdout: false,
        }
    }
}

impl BridgeConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(?path, "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sinks = &self.sinks;
        if sinks.blender && sinks.visualizer && sinks.blender_port == sinks.viz_port {
            return Err(ConfigError::Invalid(
                "Blender and Visualizer ports must be different",
            ));
        }
        if !sinks.blender && !sinks.visualizer && !sinks.stdout {
            return Err(ConfigError::Invalid(
                "At least one of --blender, --visualizer or --stdout must be specified",
            ));
        }
        if !(self.tick_hz.is_finite() && self.tick_hz > 0.0) {
            return Err(ConfigError::Invalid("Tick rate must be positive"));
        }
        if Duration::try_from_secs_f32(1.0 / self.tick_hz).is_err() {
            return Err(ConfigError::Invalid("Tick rate is too low"));
        }
        if !(self.discovery_window_secs.is_finite() && self.discovery_window_secs > 0.0) {
            return Err(ConfigError::Invalid("Discovery window must be positive"));
        }
        if Duration::try_from_secs_f32(self.discovery_window_secs).is_err() {
            return Err(ConfigError::Invalid("Discovery window is too long"));
        }
        if self.discovery_attempts == 0 {
            return Err(ConfigError::Invalid("At least one discovery attempt is required"));
        }
        Ok(())
    }

    /// Panics on values [`BridgeConfig::validate`] rejects.
    pub fn discovery_window(&self) -> Duration {
        Duration::from_secs_f32(self.discovery_window_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_hz)
    }
}
