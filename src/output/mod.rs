//! Report output
//!
//! The report goes to stdout (or `output.path`); diagnostics never do.
//!
//! - `text`: one line per rank, for piping into other tools
//! - `json`: the same entries plus status, timestamp and lookup summary

pub mod json;
pub mod text;

use crate::config::{OutputConfig, OutputFormat};
use crate::report::{CollectOutcome, Report};
use crate::stats::LookupStats;
use crate::Result;
use anyhow::Context;
use std::fs::File;
use std::io::Write;

/// Format a report as text lines
///
/// Pure function of the report: same report, same bytes.
pub fn emit(report: &Report) -> String {
    text::render(report)
}

/// Render a finished collection in the configured format
pub fn render(outcome: &CollectOutcome, stats: &LookupStats, config: &OutputConfig) -> Result<String> {
    match config.format {
        OutputFormat::Text => Ok(emit(outcome.report())),
        OutputFormat::Json => {
            let summary = config.summary.then(|| stats.summary());
            json::render(outcome, summary)
        }
    }
}

/// Write rendered output to `config.path`, or to `sink` when unset
pub fn write_output(rendered: &str, config: &OutputConfig, sink: &mut (dyn Write + Send)) -> Result<()> {
    match &config.path {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            file.write_all(rendered.as_bytes())
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => {
            sink.write_all(rendered.as_bytes())
                .context("Failed to write report")?;
            sink.flush().context("Failed to flush report")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmi::NodeId;
    use crate::report::{FailureReason, ReportEntry};
    use crate::topology::Coordinate;

    fn outcome() -> CollectOutcome {
        CollectOutcome::from_report(
            Report::from_entries(vec![
                ReportEntry::resolved(0, NodeId(10), Coordinate::new(0, 0, 0)),
                ReportEntry::failed(1, Some(NodeId(11)), FailureReason::Timeout),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_render_text_and_json() {
        let stats = LookupStats::new();
        let mut config = OutputConfig::default();

        let text = render(&outcome(), &stats, &config).unwrap();
        assert!(text.starts_with("rank 0 node 10 coords (0, 0, 0)\n"));

        config.format = OutputFormat::Json;
        let json = render(&outcome(), &stats, &config).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "partial");
        assert!(value["summary"].is_object());

        config.summary = false;
        let json = render(&outcome(), &stats, &config).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("summary").is_none());
    }

    #[test]
    fn test_write_to_sink_or_file() {
        let mut sink: Vec<u8> = Vec::new();
        write_output("rank 0\n", &OutputConfig::default(), &mut sink).unwrap();
        assert_eq!(sink, b"rank 0\n");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let config = OutputConfig {
            path: Some(path.clone()),
            ..OutputConfig::default()
        };
        let mut sink: Vec<u8> = Vec::new();
        write_output("rank 0\n", &config, &mut sink).unwrap();
        assert!(sink.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "rank 0\n");
    }
}
