//! Daemon-side configuration: logging and the companion tasks.

use serde::{Deserialize, Serialize};

use super::default_true;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines on the console instead of text.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily-rolling log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            dir: None,
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "pihome.log".to_string()
}

/// Host statistics sampler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_samples_per_minute")]
    pub samples_per_minute: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            samples_per_minute: default_samples_per_minute(),
        }
    }
}

fn default_samples_per_minute() -> u32 {
    60
}

/// UDP discovery responder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Base URL handed to displays in the bootstrap reply.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Datagram payload that triggers a reply.
    #[serde(default = "default_probe")]
    pub probe: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_discovery_port(),
            public_base_url: default_public_base_url(),
            probe: default_probe(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_discovery_port() -> u16 {
    51234
}

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_probe() -> String {
    "EINK_DISCOVER".to_string()
}
