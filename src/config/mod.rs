//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! Precedence, highest first: CLI flags, the TOML file, built-in defaults. The
//! file is taken from `--config` / `MESHCOORD_CONFIG`, else `./meshcoord.toml`
//! when present. With no file and no flags every field has a usable default
//! except the topology source, which the job reports as an initialization error.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "meshcoord.toml";

/// Complete job configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Topology source (required to run a job)
    pub topology: Option<TopologyConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Job-wide settings shared by every rank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Rank that runs the collector
    #[serde(default)]
    pub leader_rank: usize,
    /// How the leader obtains placements
    #[serde(default)]
    pub mode: CollectionMode,
    /// Leader registration endpoint (agents mode): bound by the leader, dialed by workers
    #[serde(default = "default_leader_addr")]
    pub leader_addr: String,
    /// Per-rank node ids, e.g. "10-13,20" (local mode)
    pub node_map: Option<String>,
}

fn default_leader_addr() -> String {
    "127.0.0.1:7710".to_string()
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            leader_rank: 0,
            mode: CollectionMode::default(),
            leader_addr: default_leader_addr(),
            node_map: None,
        }
    }
}

/// Collection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMode {
    /// Leader resolves every rank's node id and looks coordinates up itself
    #[default]
    Local,
    /// Each rank runs an agent; the leader queries agents over TCP
    Agents,
}

/// Collector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Per-lookup timeout in milliseconds
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// How long the leader waits for stragglers to register (agents mode)
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
    /// Maximum concurrent lookups
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_lookup_timeout_ms() -> u64 {
    5_000
}

fn default_registration_timeout_ms() -> u64 {
    30_000
}

fn default_max_in_flight() -> usize {
    num_cpus::get().max(1) * 4
}

impl CollectorConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout_ms(),
            registration_timeout_ms: default_registration_timeout_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Worker agent settings (agents mode)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// How long a worker keeps retrying the leader connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long a registered worker serves lookups before giving up on the leader
    #[serde(default = "default_serve_timeout_ms")]
    pub serve_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_serve_timeout_ms() -> u64 {
    300_000
}

impl AgentConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn serve_timeout(&self) -> Duration {
        Duration::from_millis(self.serve_timeout_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            serve_timeout_ms: default_serve_timeout_ms(),
        }
    }
}

/// Topology source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TopologyConfig {
    /// Explicit node → coordinate table
    Map {
        path: PathBuf,
        #[serde(default)]
        reserved: Vec<u32>,
    },
    /// Coordinates computed from mesh dimensions
    Torus {
        dims: [u32; 3],
        #[serde(default = "default_nodes_per_router")]
        nodes_per_router: u32,
        #[serde(default)]
        reserved: Vec<u32>,
    },
}

fn default_nodes_per_router() -> u32 {
    1
}

/// Report output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Write the report here instead of stdout
    pub path: Option<PathBuf>,
    /// Log a lookup latency summary after the report
    #[serde(default = "default_summary")]
    pub summary: bool,
}

fn default_summary() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            path: None,
            summary: default_summary(),
        }
    }
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for CollectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionMode::Local => write!(f, "local"),
            CollectionMode::Agents => write!(f, "agents"),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Resolve, parse, merge and validate the configuration for this process
pub fn load(cli: &cli::Cli) -> Result<Config> {
    let base = match config_path(cli.config.as_deref(), Path::new(DEFAULT_CONFIG_FILE)) {
        Some(path) => toml::parse_toml_file(&path)?,
        None => Config::default(),
    };

    let config = toml::merge_cli_with_config(cli, base)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    Ok(config)
}

/// Pick the explicit path, else the fallback if it exists
fn config_path(explicit: Option<&Path>, fallback: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None if fallback.is_file() => Some(fallback.to_path_buf()),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.job.leader_rank, 0);
        assert_eq!(config.job.mode, CollectionMode::Local);
        assert_eq!(config.collector.lookup_timeout(), Duration::from_secs(5));
        assert!(config.collector.max_in_flight >= 4);
        assert!(config.topology.is_none());
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(config.output.summary);
    }

    #[test]
    fn test_config_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join(DEFAULT_CONFIG_FILE);

        assert_eq!(config_path(None, &fallback), None);

        std::fs::write(&fallback, "").unwrap();
        assert_eq!(config_path(None, &fallback), Some(fallback.clone()));

        let explicit = dir.path().join("other.toml");
        assert_eq!(config_path(Some(&explicit), &fallback), Some(explicit.clone()));
    }
}
