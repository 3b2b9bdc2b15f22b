//! Configuration loading from TOML files
//!
//! The daemon takes the path from `--config`, then the `CONFIG_FILE`
//! environment variable, then `config/dev.toml`. A missing or invalid file
//! falls back to defaults.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend API, without the `/api` suffix
    pub base_url: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_backend_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Zone resync period (fixed, no backoff)
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_secs: default_sync_interval_secs() }
    }
}

fn default_sync_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Outbound dispatch queue size; requests beyond this are dropped
    #[serde(default = "default_telemetry_queue_size")]
    pub queue_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { queue_size: default_telemetry_queue_size() }
    }
}

fn default_telemetry_queue_size() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionsConfig {
    /// Enable the TCP position listener
    #[serde(default = "default_positions_listener_enabled")]
    pub listener_enabled: bool,
    /// TCP port for JSON position lines
    #[serde(default = "default_positions_listener_port")]
    pub listener_port: u16,
    /// Bounded channel between the listener and the engine
    #[serde(default = "default_positions_channel_size")]
    pub channel_size: usize,
}

impl Default for PositionsConfig {
    fn default() -> Self {
        Self {
            listener_enabled: default_positions_listener_enabled(),
            listener_port: default_positions_listener_port(),
            channel_size: default_positions_channel_size(),
        }
    }
}

fn default_positions_listener_enabled() -> bool {
    true
}

fn default_positions_listener_port() -> u16 {
    5870
}

fn default_positions_channel_size() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// File holding the persisted identity
    #[serde(default = "default_session_file")]
    pub file: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { file: default_session_file() }
    }
}

fn default_session_file() -> String {
    "session.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Status/metrics HTTP port (0 to disable)
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), http_port: default_http_port() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    30
}

fn default_http_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub positions: PositionsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    backend_url: String,
    backend_timeout_ms: u64,
    sync_interval_secs: u64,
    telemetry_queue_size: usize,
    position_listener_enabled: bool,
    position_listener_port: u16,
    position_channel_size: usize,
    session_file: String,
    metrics_interval_secs: u64,
    http_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080".to_string(),
            backend_timeout_ms: default_backend_timeout_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            telemetry_queue_size: default_telemetry_queue_size(),
            position_listener_enabled: default_positions_listener_enabled(),
            position_listener_port: default_positions_listener_port(),
            position_channel_size: default_positions_channel_size(),
            session_file: default_session_file(),
            metrics_interval_secs: default_metrics_interval_secs(),
            http_port: default_http_port(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.sync.interval_secs == 0 {
            anyhow::bail!("sync.interval_secs must be greater than zero in {}", path.display());
        }

        Ok(Self {
            backend_url: toml_config.backend.base_url.trim_end_matches('/').to_string(),
            backend_timeout_ms: toml_config.backend.timeout_ms,
            sync_interval_secs: toml_config.sync.interval_secs,
            telemetry_queue_size: toml_config.telemetry.queue_size.max(1),
            position_listener_enabled: toml_config.positions.listener_enabled,
            position_listener_port: toml_config.positions.listener_port,
            position_channel_size: toml_config.positions.channel_size.max(1),
            session_file: toml_config.session.file,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            http_port: toml_config.metrics.http_port,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn telemetry_queue_size(&self) -> usize {
        self.telemetry_queue_size
    }

    pub fn position_listener_enabled(&self) -> bool {
        self.position_listener_enabled
    }

    pub fn position_listener_port(&self) -> u16 {
        self.position_listener_port
    }

    pub fn position_channel_size(&self) -> usize {
        self.position_channel_size
    }

    pub fn session_file(&self) -> &str {
        &self.session_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
