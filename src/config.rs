use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime configuration for the acquisition pipeline.
///
/// Loaded from a TOML file; every field has a default matching the
/// scanner deployment this was written for, so an empty file is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    Sftp,
}

/// How to reach the scanner's image store.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Private key file for SFTP public-key authentication.
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            private_key: None,
            base_dir: default_base_dir(),
            protocol: default_protocol(),
        }
    }
}

fn default_hostname() -> String {
    "cnimr".to_string()
}

fn default_port() -> u16 {
    21
}

fn default_base_dir() -> String {
    "/export/home1/sdc_image_pool/images".to_string()
}

fn default_protocol() -> Protocol {
    Protocol::Ftp
}

/// Polling and assembly tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Sleep between poll iterations in every worker.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Bounded wait when the volumizer pops from the slice queue.
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    /// Number of series seen at startup to skip (setup scans collected
    /// before the operator truly begins a run).
    #[serde(default)]
    pub skip_series: usize,

    /// A series qualifies as a time-series when NumberOfTemporalPositions
    /// exceeds this value. The default excludes short localizer and
    /// calibration scans.
    #[serde(default = "default_min_timepoints")]
    pub timeseries_min_timepoints: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            pop_timeout_ms: default_pop_timeout_ms(),
            skip_series: 0,
            timeseries_min_timepoints: default_min_timepoints(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

fn default_interval_ms() -> u64 {
    100
}

fn default_pop_timeout_ms() -> u64 {
    1000
}

fn default_min_timepoints() -> u32 {
    6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.connection.hostname, "cnimr");
        assert_eq!(config.connection.port, 21);
        assert_eq!(config.connection.protocol, Protocol::Ftp);
        assert_eq!(config.polling.timeseries_min_timepoints, 6);
        assert_eq!(config.polling.skip_series, 0);
    }

    #[test]
    fn overrides_are_applied() {
        let raw = r#"
            [connection]
            hostname = "scanner.local"
            port = 22
            protocol = "sftp"

            [polling]
            skip_series = 2
            timeseries_min_timepoints = 1
        "#;
        let config: Config = toml::from_str(raw).expect("config should parse");
        assert_eq!(config.connection.hostname, "scanner.local");
        assert_eq!(config.connection.protocol, Protocol::Sftp);
        assert_eq!(config.polling.skip_series, 2);
        assert_eq!(config.polling.timeseries_min_timepoints, 1);
    }
}
