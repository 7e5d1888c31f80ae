//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Shared primitives and utilities for the node and monitor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use wq_msg::{WireFormat, DEFAULT_MAX_INGEST_BYTES};

use crate::logging::LogFormat;

/// Port the monitor listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8888;

/// Message written to a peer that connects while another session is active.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Another client is already connected!";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_display_interval() -> Option<Duration> {
    Some(default_interval())
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_true() -> bool {
    true
}

fn default_rejection_message() -> String {
    DEFAULT_REJECTION_MESSAGE.to_owned()
}

fn default_max_attempts() -> usize {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_ingest_bytes() -> usize {
    DEFAULT_MAX_INGEST_BYTES
}

fn default_event_capacity() -> usize {
    10
}

fn default_simulation_seed() -> u64 {
    0x5EED_u64
}

/// Primary configuration object shared by the node and the monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub wire: WireConfig,
    #[serde(default)]
    pub reactor: ReactorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "WQ_CONFIG";

    /// Load configuration from disk, respecting the `WQ_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Fails when neither the environment override nor any candidate exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        Self::locate(candidates)?.ok_or_else(|| {
            anyhow!(
                "no configuration files found. inspected: {}",
                candidates
                    .iter()
                    .map(|p| p.as_ref().display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    /// Like [`AppConfig::load_with_source`] but falls back to built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        match Self::locate(candidates)? {
            Some(loaded) => Ok(loaded),
            None => {
                let config = AppConfig::default();
                config.validate()?;
                Ok(LoadedAppConfig {
                    config,
                    source: None,
                })
            }
        }
    }

    fn locate<P: AsRef<Path>>(candidates: &[P]) -> Result<Option<LoadedAppConfig>> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(Some(LoadedAppConfig {
                    config,
                    source: Some(path),
                }));
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(Some(LoadedAppConfig {
                    config,
                    source: Some(path),
                }));
            }
        }
        Ok(None)
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.monitor.validate()?;
        self.connect.validate()?;
        self.wire.validate()?;
        self.reactor.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// What the node writes into the temperature field when the probe read fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TemperatureFailurePolicy {
    /// Keep the last good temperature.
    #[default]
    KeepLast,
    /// Write the `-1` sentinel, as legacy consumers expect.
    Sentinel,
}

/// Inclusive IPv4 range the monitor address must fall into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermittedRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl PermittedRange {
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        (u32::from(self.start)..=u32::from(self.end)).contains(&u32::from(addr))
    }
}

impl std::fmt::Display for PermittedRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
    /// Fail every Nth temperature read; zero disables injection.
    #[serde(default)]
    pub temperature_failure_every: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_simulation_seed(),
            temperature_failure_every: 0,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Dotted-quad address of the monitor.
    #[serde(default)]
    pub monitor_address: Option<String>,
    /// Single-line text file holding the monitor address, read when
    /// `monitor_address` is unset.
    #[serde(default)]
    pub address_file: Option<PathBuf>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub permitted_range: Option<PermittedRange>,
    #[serde(default = "default_interval", rename = "sampling_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sampling_interval: Duration,
    #[serde(default = "default_interval", rename = "publish_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub publish_interval: Duration,
    /// Period of the local display refresh; `0` in TOML disables it.
    #[serde(
        default = "default_display_interval",
        rename = "display_interval_ms"
    )]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub display_interval: Option<Duration>,
    #[serde(default)]
    pub temperature_failure: TemperatureFailurePolicy,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            monitor_address: None,
            address_file: None,
            port: default_port(),
            permitted_range: None,
            sampling_interval: default_interval(),
            publish_interval: default_interval(),
            display_interval: default_display_interval(),
            temperature_failure: TemperatureFailurePolicy::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("node.port must be between 1 and 65535"));
        }
        for (name, interval) in [
            ("sampling_interval_ms", self.sampling_interval),
            ("publish_interval_ms", self.publish_interval),
        ] {
            if interval.is_zero() {
                return Err(anyhow!("node.{} must be greater than zero", name));
            }
        }
        if let Some(range) = &self.permitted_range {
            if u32::from(range.start) > u32::from(range.end) {
                return Err(anyhow!("node.permitted_range start {} is above end {}", range.start, range.end));
            }
        }
        Ok(())
    }

    /// Display timer period, or `None` when the display is disabled.
    pub fn display_period(&self) -> Option<Duration> {
        self.display_interval.filter(|period| !period.is_zero())
    }

    /// Resolve the raw monitor address text, consulting the address file when
    /// no inline address is configured. Only the first line of the file is
    /// used, with surrounding whitespace removed.
    pub fn resolve_address(&self) -> Result<String> {
        if let Some(address) = self
            .monitor_address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
        {
            return Ok(address.to_owned());
        }
        let path = self
            .address_file
            .as_ref()
            .ok_or_else(|| anyhow!("no monitor address configured (set node.monitor_address or node.address_file)"))?;
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to open address file {}", path.display()))?;
        let address = contents.lines().next().unwrap_or_default().trim();
        if address.is_empty() {
            return Err(anyhow!("address file {} is empty", path.display()));
        }
        Ok(address.to_owned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_true")]
    pub single_client: bool,
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
    /// Mirror every merged reading set to stdout as one JSON object per line.
    #[serde(default)]
    pub json_stdout: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            single_client: true,
            rejection_message: default_rejection_message(),
            json_stdout: false,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.single_client {
            return Err(anyhow!(
                "monitor.single_client must be true; concurrent sessions are not supported"
            ));
        }
        Ok(())
    }
}

/// Whether the node reconnects after losing the monitor mid-session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReconnectMode {
    /// Keep trying in the background, one attempt per retry delay.
    #[default]
    Background,
    /// Only the startup attempts; a lost session stays down.
    StartupOnly,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_delay", rename = "retry_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,
    #[serde(default)]
    pub reconnect: ReconnectMode,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            reconnect: ReconnectMode::default(),
        }
    }
}

impl ConnectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("connect.max_attempts must be at least 1"));
        }
        if self.retry_delay.is_zero() && self.reconnect == ReconnectMode::Background {
            return Err(anyhow!(
                "connect.retry_delay_ms must be greater than zero for background reconnects"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireConfig {
    #[serde(default)]
    pub format: WireFormat,
    #[serde(default = "default_max_ingest_bytes")]
    pub max_ingest_bytes: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            format: WireFormat::default(),
            max_ingest_bytes: default_max_ingest_bytes(),
        }
    }
}

impl WireConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_ingest_bytes < 64 {
            return Err(anyhow!(
                "wire.max_ingest_bytes must be at least 64 (got {})",
                self.max_ingest_bytes
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

impl ReactorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(anyhow!("reactor.event_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file; stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: LogFormat::default(),
            file_prefix: None,
        }
    }
}
