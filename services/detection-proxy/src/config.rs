//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Detection tokens are never part of the config; they live in the pool
//! file managed by the token store.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Inbound HTTP server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// External detection API settings
#[derive(Debug, Deserialize)]
pub struct DetectionConfig {
    /// Full URL of the detection endpoint, e.g.
    /// `https://ping.arya.ai/api/v1/deepfake-detection/image`
    pub endpoint_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Fixed pause before every upstream attempt, including the first.
    /// A blunt courtesy rate limit toward the detection API.
    #[serde(default = "default_attempt_delay_ms")]
    pub attempt_delay_ms: u64,
}

/// Token pool settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_tokens_file")]
    pub tokens_file: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tokens_file: default_tokens_file(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_attempt_delay_ms() -> u64 {
    20_000
}

fn default_tokens_file() -> PathBuf {
    PathBuf::from("tokens.json")
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        if !config.detection.endpoint_url.starts_with("http://")
            && !config.detection.endpoint_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "endpoint_url must start with http:// or https://, got: {}",
                config.detection.endpoint_url
            )));
        }

        if config.detection.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("detection-proxy.toml")
    }
}
