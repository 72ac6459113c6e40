//! Configuration for the pool server
//!
//! A JSON config file carries the full surface; command-line arguments
//! override the handful of values that change between deployments.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stratum::conn_control::ConnControlConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "stratum-pool",
    about = "Coin-agnostic stratum mining pool server",
    version
)]
pub struct Args {
    /// Configuration file path (JSON)
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listen address for the stratum port
    #[clap(short, long, env = "POOL_LISTEN")]
    pub listen: Option<String>,

    /// Upstream node URL
    #[clap(short, long, env = "POOL_NODE_URL")]
    pub node: Option<String>,

    /// Server id for nonce-space partitioning
    #[clap(long, env = "POOL_SERVER_ID")]
    pub server_id: Option<u32>,

    /// Log level
    #[clap(long, default_value = "info")]
    pub log_level: String,

    /// Log format (plain, json)
    #[clap(long, default_value = "plain")]
    pub log_format: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Stratum listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Connection ceiling; also sizes the session id space
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Server id for nonce-space partitioning across peer servers
    #[serde(default)]
    pub server_id: u32,

    /// Ban policy
    #[serde(default)]
    pub ban: BanConfig,

    /// Per-IP limiter policy
    #[serde(default)]
    pub ip: IpPolicy,

    /// Per-session behavior
    #[serde(default)]
    pub session: SessionConfig,

    /// Upstream node connection
    #[serde(default)]
    pub node: NodeConfig,
}

/// Miner ban policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanConfig {
    /// Ban duration in seconds; 0 disables banning
    #[serde(default = "default_ban_period_secs")]
    pub ban_period_secs: u64,

    /// Forward (rather than handle) requests from banned miners
    #[serde(default)]
    pub forward_banned: bool,

    /// Interval between stale-entry sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Per-IP limiter policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpPolicy {
    /// Whether IP-level banning is enabled
    #[serde(default)]
    pub enable: bool,

    /// Max messages per second per IP
    #[serde(default = "default_max_throughput")]
    pub max_throughput: u32,

    /// Max connections per second per IP
    #[serde(default = "default_max_connection")]
    pub max_connection: u32,

    /// Burst multiplier for throughput
    #[serde(default = "default_burst_ratio")]
    pub throughput_burst_ratio: f64,

    /// Burst multiplier for connections
    #[serde(default = "default_burst_ratio")]
    pub connection_burst_ratio: f64,

    /// IPs exempt from limiting
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Per-session behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds without a complete line before the session closes
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Periodic job push interval in seconds; 0 = push on new work only
    #[serde(default)]
    pub job_interval_secs: u64,

    /// Share difficulty assigned to every session
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: u64,
}

/// Upstream node connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node JSON-RPC URL
    #[serde(default = "default_node_url")]
    pub url: String,

    /// Template poll interval in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

// Default value functions
fn default_listen() -> String {
    "0.0.0.0:9119".to_string()
}

fn default_max_connections() -> u32 {
    32_768
}

fn default_ban_period_secs() -> u64 {
    20 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_max_throughput() -> u32 {
    131_072
}

fn default_max_connection() -> u32 {
    1_000
}

fn default_burst_ratio() -> f64 {
    1.2
}

fn default_idle_timeout_secs() -> u64 {
    5 * 60
}

fn default_initial_difficulty() -> u64 {
    500_000
}

fn default_node_url() -> String {
    "http://127.0.0.1:9888".to_string()
}

fn default_sync_interval_ms() -> u64 {
    100
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            ban_period_secs: default_ban_period_secs(),
            forward_banned: false,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for IpPolicy {
    fn default() -> Self {
        Self {
            enable: false,
            max_throughput: default_max_throughput(),
            max_connection: default_max_connection(),
            throughput_burst_ratio: default_burst_ratio(),
            connection_burst_ratio: default_burst_ratio(),
            whitelist: Vec::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            job_interval_secs: 0,
            initial_difficulty: default_initial_difficulty(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: default_node_url(),
            sync_interval_ms: default_sync_interval_ms(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            server_id: 0,
            ban: BanConfig::default(),
            ip: IpPolicy::default(),
            session: SessionConfig::default(),
            node: NodeConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {e}")))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::config(format!("failed to parse config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from command-line arguments, starting from the
    /// file (or defaults) and applying per-argument overrides
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(listen) = &args.listen {
            config.listen = listen.clone();
        }
        if let Some(node) = &args.node {
            config.node.url = node.clone();
        }
        if let Some(server_id) = args.server_id {
            config.server_id = server_id;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be positive"));
        }
        if self.session.initial_difficulty == 0 {
            return Err(Error::config("initial_difficulty must be positive"));
        }
        if self.node.sync_interval_ms == 0 {
            return Err(Error::config("sync_interval_ms must be positive"));
        }
        Ok(())
    }

    /// The connection-control slice of the configuration
    pub fn conn_control_config(&self) -> ConnControlConfig {
        ConnControlConfig {
            ban_period: std::time::Duration::from_secs(self.ban.ban_period_secs),
            ip_ban_enable: self.ip.enable,
            max_throughput: self.ip.max_throughput,
            max_connection: self.ip.max_connection,
            throughput_ratio: self.ip.throughput_burst_ratio,
            connection_ratio: self.ip.connection_burst_ratio,
            whitelist: self.ip.whitelist.clone(),
            forward_banned: self.ban.forward_banned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.listen, "0.0.0.0:9119");
        assert_eq!(config.max_connections, 32_768);
        assert_eq!(config.ban.ban_period_secs, 1200);
        assert_eq!(config.session.idle_timeout_secs, 300);
        assert_eq!(config.session.job_interval_secs, 0);
        assert_eq!(config.session.initial_difficulty, 500_000);
        assert_eq!(config.node.sync_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"listen":"127.0.0.1:9000","ban":{"ban_period_secs":0}}"#)
                .unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.ban.ban_period_secs, 0);
        assert_eq!(config.max_connections, 32_768);
        assert_eq!(config.session.initial_difficulty, 500_000);
    }

    #[test]
    fn test_validation_rejects_zero_ceiling() {
        let config = PoolConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
