//! CLI to Config conversion utilities

use crate::config::cli;
use crate::config::{CollectionMode, OutputFormat};
use anyhow::{Context, Result};

/// Parse a duration string (e.g., "250ms", "5s", "2m") to milliseconds
///
/// A bare number is taken as milliseconds.
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("ms") {
        (s.trim_end_matches("ms"), 1u64)
    } else if s.ends_with("sec") || s.ends_with('s') {
        (s.trim_end_matches("sec").trim_end_matches('s'), 1000)
    } else if s.ends_with("min") || s.ends_with('m') {
        (s.trim_end_matches("min").trim_end_matches('m'), 60_000)
    } else if s.ends_with('h') {
        (s.trim_end_matches('h'), 3_600_000)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Duration out of range: {}", s))
}

/// Convert CLI ModeArg to config CollectionMode
pub fn convert_mode(arg: cli::ModeArg) -> CollectionMode {
    match arg {
        cli::ModeArg::Local => CollectionMode::Local,
        cli::ModeArg::Agents => CollectionMode::Agents,
    }
}

/// Convert CLI FormatArg to config OutputFormat
pub fn convert_format(arg: cli::FormatArg) -> OutputFormat {
    match arg {
        cli::FormatArg::Text => OutputFormat::Text,
        cli::FormatArg::Json => OutputFormat::Json,
    }
}
