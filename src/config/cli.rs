//! CLI argument parsing using clap
//!
//! Every flag is optional: under a launcher the program normally runs with none
//! and takes its settings from the config file and the environment.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Collection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Leader resolves all placements itself (needs a node map)
    Local,
    /// Every rank runs an agent that the leader queries
    Agents,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// One line per rank
    Text,
    /// JSON document
    Json,
}

/// meshcoord - report the mesh coordinates of every rank in a parallel job
#[derive(Parser, Debug, Default)]
#[command(name = "meshcoord")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, env = "MESHCOORD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Collection mode: local or agents
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Leader registration endpoint (agents mode), e.g. "nid00010:7710"
    #[arg(long, env = "MESHCOORD_LEADER_ADDR")]
    pub leader_addr: Option<String>,

    /// Rank that collects and prints the report
    #[arg(long)]
    pub leader_rank: Option<usize>,

    /// Per-lookup timeout (e.g., 500ms, 5s)
    #[arg(long)]
    pub timeout: Option<String>,

    /// How long to wait for all ranks to register (e.g., 30s, 2m)
    #[arg(long)]
    pub registration_timeout: Option<String>,

    /// Maximum concurrent lookups
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Report format
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Suppress the lookup latency summary
    #[arg(long)]
    pub no_summary: bool,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_in_flight == Some(0) {
            anyhow::bail!("max_in_flight must be at least 1");
        }

        if let Some(ref addr) = self.leader_addr {
            if addr.trim().is_empty() {
                anyhow::bail!("leader_addr must not be empty");
            }
        }

        Ok(())
    }
}
