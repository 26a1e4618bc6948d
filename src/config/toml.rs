//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::{convert_format, convert_mode, parse_duration_ms};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Relative mesh map paths are relative to the config file, not the cwd
    if let Some(TopologyConfig::Map { path: ref mut map_path, .. }) = config.topology {
        if map_path.is_relative() {
            if let Some(dir) = path.parent() {
                *map_path = dir.join(&*map_path);
            }
        }
    }

    Ok(config)
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    if let Some(mode) = cli.mode {
        config.job.mode = convert_mode(mode);
    }
    if let Some(ref addr) = cli.leader_addr {
        config.job.leader_addr = addr.clone();
    }
    if let Some(rank) = cli.leader_rank {
        config.job.leader_rank = rank;
    }

    if let Some(ref timeout) = cli.timeout {
        config.collector.lookup_timeout_ms = parse_duration_ms(timeout)
            .context("Invalid --timeout")?;
    }
    if let Some(ref timeout) = cli.registration_timeout {
        config.collector.registration_timeout_ms = parse_duration_ms(timeout)
            .context("Invalid --registration-timeout")?;
    }
    if let Some(n) = cli.max_in_flight {
        config.collector.max_in_flight = n;
    }

    if let Some(format) = cli.format {
        config.output.format = convert_format(format);
    }
    if let Some(ref path) = cli.output {
        config.output.path = Some(path.clone());
    }
    if cli.no_summary {
        config.output.summary = false;
    }

    Ok(config)
}
