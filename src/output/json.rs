//! JSON output formatting
//!
//! ```json
//! {
//!   "status": "partial",
//!   "generated_at": "2024-05-01T12:00:00Z",
//!   "group_size": 3,
//!   "failed_ranks": [1],
//!   "entries": [
//!     {"rank": 0, "node_id": 10, "status": "resolved", "coordinate": {"x": 0, "y": 0, "z": 0}},
//!     {"rank": 1, "node_id": 11, "status": "failed", "reason": "timeout"}
//!   ],
//!   "summary": { ... }
//! }
//! ```

use crate::pmi::Rank;
use crate::report::{CollectOutcome, ReportEntry};
use crate::stats::LookupSummary;
use crate::Result;
use anyhow::Context;
use serde::Serialize;

/// Top-level JSON document
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub status: &'static str,
    pub generated_at: String,
    pub group_size: usize,
    pub failed_ranks: Vec<Rank>,
    pub entries: &'a [ReportEntry],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<LookupSummary>,
}

impl<'a> JsonReport<'a> {
    pub fn new(outcome: &'a CollectOutcome, summary: Option<LookupSummary>) -> Self {
        let report = outcome.report();
        Self {
            status: outcome.status_str(),
            generated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            group_size: report.len(),
            failed_ranks: report.failed_ranks().into_iter().collect(),
            entries: report.entries(),
            summary,
        }
    }
}

/// Pretty-printed JSON document, newline-terminated
pub fn render(outcome: &CollectOutcome, summary: Option<LookupSummary>) -> Result<String> {
    let doc = JsonReport::new(outcome, summary);
    let mut out = serde_json::to_string_pretty(&doc)
        .context("Failed to serialize report to JSON")?;
    out.push('\n');
    Ok(out)
}
