//! Collection report
//!
//! A report has exactly one entry per rank of the job, sorted by rank, whatever
//! order the lookups finished in. Reports are built once by the collector and
//! never modified afterwards.

use crate::error::LookupError;
use crate::pmi::{NodeId, Rank};
use crate::topology::Coordinate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Why a rank has no coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The rank never registered
    Unregistered,
    /// The node has no mesh coordinate
    TopologyUnavailable,
    /// The lookup exceeded its timeout
    Timeout,
    /// The job was aborted before the lookup finished
    Aborted,
    /// The connection to the rank's agent failed
    Transport,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Unregistered => "unregistered",
            FailureReason::TopologyUnavailable => "topology-unavailable",
            FailureReason::Timeout => "timeout",
            FailureReason::Aborted => "aborted",
            FailureReason::Transport => "transport",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&LookupError> for FailureReason {
    fn from(err: &LookupError) -> Self {
        match err {
            LookupError::TopologyUnavailable(_) => FailureReason::TopologyUnavailable,
            LookupError::Timeout(_) => FailureReason::Timeout,
            LookupError::Transport(_) => FailureReason::Transport,
        }
    }
}

/// Outcome for one rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum EntryStatus {
    Resolved { coordinate: Coordinate },
    Failed { reason: FailureReason },
}

/// One line of the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub rank: Rank,
    /// Unknown for ranks that never registered
    pub node_id: Option<NodeId>,
    #[serde(flatten)]
    pub status: EntryStatus,
}

impl ReportEntry {
    pub fn resolved(rank: Rank, node_id: NodeId, coordinate: Coordinate) -> Self {
        Self {
            rank,
            node_id: Some(node_id),
            status: EntryStatus::Resolved { coordinate },
        }
    }

    pub fn failed(rank: Rank, node_id: Option<NodeId>, reason: FailureReason) -> Self {
        Self {
            rank,
            node_id,
            status: EntryStatus::Failed { reason },
        }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self.status {
            EntryStatus::Resolved { coordinate } => Some(coordinate),
            EntryStatus::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self.status {
            EntryStatus::Resolved { .. } => None,
            EntryStatus::Failed { reason } => Some(reason),
        }
    }
}

/// Rank-ordered placement table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Report {
    entries: Vec<ReportEntry>,
}

impl Report {
    /// Build a report from entries in any order
    ///
    /// Entries must cover ranks `0..n` exactly once.
    pub fn from_entries(mut entries: Vec<ReportEntry>) -> anyhow::Result<Self> {
        entries.sort_by_key(|e| e.rank);
        for (expected, entry) in entries.iter().enumerate() {
            if entry.rank != expected {
                anyhow::bail!(
                    "report entries must cover every rank once: expected rank {}, found {}",
                    expected,
                    entry.rank
                );
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ranks with a failure marker, ascending
    pub fn failed_ranks(&self) -> BTreeSet<Rank> {
        self.entries
            .iter()
            .filter(|e| e.failure().is_some())
            .map(|e| e.rank)
            .collect()
    }
}

/// Result of a collection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Every rank resolved
    Complete(Report),
    /// At least one rank carries a failure marker
    PartialSuccess {
        report: Report,
        failed_ranks: BTreeSet<Rank>,
    },
}

impl CollectOutcome {
    /// Classify a finished report
    pub fn from_report(report: Report) -> Self {
        let failed_ranks = report.failed_ranks();
        if failed_ranks.is_empty() {
            CollectOutcome::Complete(report)
        } else {
            CollectOutcome::PartialSuccess {
                report,
                failed_ranks,
            }
        }
    }

    pub fn report(&self) -> &Report {
        match self {
            CollectOutcome::Complete(report) => report,
            CollectOutcome::PartialSuccess { report, .. } => report,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, CollectOutcome::Complete(_))
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            CollectOutcome::Complete(_) => "complete",
            CollectOutcome::PartialSuccess { .. } => "partial",
        }
    }

    /// Process exit code: 0 when complete, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_complete() {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_sorted_by_rank() {
        let report = Report::from_entries(vec![
            ReportEntry::resolved(2, NodeId(12), Coordinate::new(0, 1, 0)),
            ReportEntry::resolved(0, NodeId(10), Coordinate::new(0, 0, 0)),
            ReportEntry::failed(1, Some(NodeId(11)), FailureReason::Timeout),
        ])
        .unwrap();

        let ranks: Vec<_> = report.entries().iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(report.failed_ranks(), BTreeSet::from([1]));
    }

    #[test]
    fn test_gap_or_duplicate_rejected() {
        assert!(Report::from_entries(vec![
            ReportEntry::resolved(0, NodeId(10), Coordinate::new(0, 0, 0)),
            ReportEntry::resolved(2, NodeId(12), Coordinate::new(0, 1, 0)),
        ])
        .is_err());

        assert!(Report::from_entries(vec![
            ReportEntry::resolved(0, NodeId(10), Coordinate::new(0, 0, 0)),
            ReportEntry::resolved(0, NodeId(10), Coordinate::new(0, 0, 0)),
        ])
        .is_err());
    }

    #[test]
    fn test_outcome_classification() {
        let complete = Report::from_entries(vec![ReportEntry::resolved(
            0,
            NodeId(1),
            Coordinate::new(0, 0, 0),
        )])
        .unwrap();
        let outcome = CollectOutcome::from_report(complete);
        assert!(outcome.is_complete());
        assert_eq!(outcome.exit_code(), 0);

        let partial = Report::from_entries(vec![ReportEntry::failed(
            0,
            None,
            FailureReason::Unregistered,
        )])
        .unwrap();
        let outcome = CollectOutcome::from_report(partial);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.exit_code(), 1);
        assert!(matches!(
            outcome,
            CollectOutcome::PartialSuccess { ref failed_ranks, .. } if failed_ranks.contains(&0)
        ));
    }

    #[test]
    fn test_failure_reason_from_lookup_error() {
        assert_eq!(
            FailureReason::from(&LookupError::TopologyUnavailable(NodeId(1))),
            FailureReason::TopologyUnavailable
        );
        assert_eq!(
            FailureReason::from(&LookupError::Timeout(std::time::Duration::from_secs(1))),
            FailureReason::Timeout
        );
    }
}
