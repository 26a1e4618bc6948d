//! Collection statistics
//!
//! The collector records one sample per lookup it actually ran. Unregistered
//! and aborted ranks never reach a lookup, so they only show up in the failure
//! counts.

pub mod histogram;

use crate::report::{FailureReason, Report};
use histogram::LatencyHistogram;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-collection lookup statistics
#[derive(Debug, Clone, Default)]
pub struct LookupStats {
    latency: LatencyHistogram,
    resolved: usize,
    failures: BTreeMap<FailureReason, usize>,
    elapsed: Duration,
}

impl LookupStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup that ran to completion or timed out
    pub fn record_lookup(&mut self, latency: Duration) {
        self.latency.record(latency);
    }

    /// Tally the final report
    pub fn tally(&mut self, report: &Report) {
        self.resolved = 0;
        self.failures.clear();
        for entry in report.entries() {
            match entry.failure() {
                None => self.resolved += 1,
                Some(reason) => *self.failures.entry(reason).or_insert(0) += 1,
            }
        }
    }

    /// Wall-clock duration of the whole collection
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    pub fn resolved(&self) -> usize {
        self.resolved
    }

    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn failures(&self) -> &BTreeMap<FailureReason, usize> {
        &self.failures
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Serializable digest for reports and logs
    pub fn summary(&self) -> LookupSummary {
        let micros = |d: Option<Duration>| d.map(|d| d.as_micros() as u64);
        LookupSummary {
            resolved: self.resolved,
            failed: self.failed(),
            failures: self
                .failures
                .iter()
                .map(|(reason, count)| (reason.as_str().to_string(), *count))
                .collect(),
            lookups: self.latency.len(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            latency_mean_us: micros(self.latency.mean()),
            latency_p50_us: micros(self.latency.percentile(50.0)),
            latency_p99_us: micros(self.latency.percentile(99.0)),
            latency_max_us: micros(self.latency.max()),
        }
    }
}

/// Flattened statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupSummary {
    pub resolved: usize,
    pub failed: usize,
    pub failures: BTreeMap<String, usize>,
    pub lookups: u64,
    pub elapsed_ms: u64,
    pub latency_mean_us: Option<u64>,
    pub latency_p50_us: Option<u64>,
    pub latency_p99_us: Option<u64>,
    pub latency_max_us: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmi::NodeId;
    use crate::report::ReportEntry;
    use crate::topology::Coordinate;

    #[test]
    fn test_tally_and_summary() {
        let report = Report::from_entries(vec![
            ReportEntry::resolved(0, NodeId(10), Coordinate::new(0, 0, 0)),
            ReportEntry::failed(1, Some(NodeId(11)), FailureReason::Timeout),
            ReportEntry::failed(2, None, FailureReason::Unregistered),
            ReportEntry::resolved(3, NodeId(13), Coordinate::new(1, 1, 0)),
        ])
        .unwrap();

        let mut stats = LookupStats::new();
        stats.record_lookup(Duration::from_micros(120));
        stats.record_lookup(Duration::from_millis(50));
        stats.record_lookup(Duration::from_micros(80));
        stats.tally(&report);
        stats.set_elapsed(Duration::from_millis(51));

        let summary = stats.summary();
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.lookups, 3);
        assert_eq!(summary.failures.get("timeout"), Some(&1));
        assert_eq!(summary.failures.get("unregistered"), Some(&1));
        assert_eq!(summary.elapsed_ms, 51);
        assert!(summary.latency_max_us.unwrap() >= 49_900);
        let mean = summary.latency_mean_us.unwrap();
        assert!((16_000..=17_500).contains(&mean), "mean {}", mean);
    }

    #[test]
    fn test_empty_summary() {
        let summary = LookupStats::new().summary();
        assert_eq!(summary.lookups, 0);
        assert_eq!(summary.latency_p50_us, None);
        assert_eq!(summary.latency_mean_us, None);
    }
}
