//! Human-readable text output

use crate::report::{EntryStatus, Report, ReportEntry};
use crate::stats::LookupSummary;
use std::fmt::Write;

/// One line per rank, ascending, newline-terminated
pub fn render(report: &Report) -> String {
    let mut out = String::with_capacity(report.len() * 40);
    for entry in report.entries() {
        out.push_str(&format_entry(entry));
        out.push('\n');
    }
    out
}

/// Format a single report line
///
/// ```text
/// rank 0 node 10 coords (0, 0, 0)
/// rank 1 node ? unresolved (unregistered)
/// ```
pub fn format_entry(entry: &ReportEntry) -> String {
    let node = match entry.node_id {
        Some(node) => node.to_string(),
        None => "?".to_string(),
    };

    match entry.status {
        EntryStatus::Resolved { coordinate } => {
            format!("rank {} node {} coords {}", entry.rank, node, coordinate)
        }
        EntryStatus::Failed { reason } => {
            format!("rank {} node {} unresolved ({})", entry.rank, node, reason)
        }
    }
}

/// One-line digest of a collection, for the log
pub fn format_summary(summary: &LookupSummary) -> String {
    let mut line = format!(
        "{} resolved, {} failed in {}ms",
        summary.resolved, summary.failed, summary.elapsed_ms
    );

    if !summary.failures.is_empty() {
        let reasons: Vec<String> = summary
            .failures
            .iter()
            .map(|(reason, count)| format!("{}={}", reason, count))
            .collect();
        let _ = write!(line, " ({})", reasons.join(", "));
    }

    if let (Some(mean), Some(p50), Some(p99), Some(max)) = (
        summary.latency_mean_us,
        summary.latency_p50_us,
        summary.latency_p99_us,
        summary.latency_max_us,
    ) {
        let _ = write!(
            line,
            "; lookup latency mean={}µs p50={}µs p99={}µs max={}µs",
            mean, p50, p99, max
        );
    }

    line
}
