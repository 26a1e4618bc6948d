//! Placement collector
//!
//! Runs on the leader only. For every rank in the job the collector takes the
//! node id from the registration directory and asks a [`PlacementLookup`] for
//! that rank's coordinate.
//!
//! # Failure policy
//!
//! - A failed lookup becomes a failure marker for that rank; the rest continue
//! - Each lookup is bounded by a timeout and never retried
//! - Ranks that never registered are marked without a lookup
//! - An abort abandons in-flight lookups and marks their ranks `aborted`
//!
//! Lookups run concurrently (up to `max_in_flight` at a time) and the report is
//! assembled by rank, so completion order never shows in the output.

use crate::agent::ParticipantAgent;
use crate::config::CollectorConfig;
use crate::directory::{Directory, Participant};
use crate::error::LookupError;
use crate::pmi::{NodeId, Rank};
use crate::report::{CollectOutcome, FailureReason, Report, ReportEntry};
use crate::stats::LookupStats;
use crate::topology::{Coordinate, TopologyResolver};
use crate::util::abort::AbortSignal;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Source of per-rank placements
///
/// Implementations may block on the network; the collector applies the timeout.
#[async_trait]
pub trait PlacementLookup: Send + Sync {
    /// Look up the coordinate of `rank`, which registered as running on `node`
    async fn lookup(&self, rank: Rank, node: NodeId) -> Result<Coordinate, LookupError>;
}

/// Lookup answered by a local topology resolver, keyed by node id
pub struct LocalLookup {
    topology: Arc<dyn TopologyResolver>,
}

impl LocalLookup {
    pub fn new(topology: Arc<dyn TopologyResolver>) -> Self {
        Self { topology }
    }
}

#[async_trait]
impl PlacementLookup for LocalLookup {
    async fn lookup(&self, _rank: Rank, node: NodeId) -> Result<Coordinate, LookupError> {
        self.topology.lookup_coordinate(node)
    }
}

/// The leader's own agent answers for its own rank
#[async_trait]
impl PlacementLookup for ParticipantAgent {
    async fn lookup(&self, rank: Rank, _node: NodeId) -> Result<Coordinate, LookupError> {
        if rank != self.rank() {
            return Err(LookupError::Transport(format!(
                "agent for rank {} cannot answer for rank {}",
                self.rank(),
                rank
            )));
        }
        self.resolve_self().map(|p| p.coordinate)
    }
}

/// Finished collection: classified report plus lookup statistics
#[derive(Debug, Clone)]
pub struct Collection {
    pub outcome: CollectOutcome,
    pub stats: LookupStats,
}

/// Leader-side aggregator
pub struct Collector<L> {
    lookup: Arc<L>,
    timeout: Duration,
    max_in_flight: usize,
}

impl<L: PlacementLookup + 'static> Collector<L> {
    pub fn new(lookup: Arc<L>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            lookup,
            timeout,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn from_config(lookup: Arc<L>, config: &CollectorConfig) -> Self {
        Self::new(lookup, config.lookup_timeout(), config.max_in_flight)
    }

    /// Collect a placement for every rank in the directory's group
    ///
    /// Never fails: every problem is recorded in the report.
    pub async fn collect(&self, directory: &Directory, abort: &AbortSignal) -> Collection {
        let started = Instant::now();
        let size = directory.group_size();
        let mut stats = LookupStats::new();
        let mut entries: BTreeMap<Rank, ReportEntry> = BTreeMap::new();

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for rank in directory.missing() {
            tracing::warn!(rank, "rank never registered");
            entries.insert(rank, ReportEntry::failed(rank, None, FailureReason::Unregistered));
        }

        for Participant { rank, node_id: node } in directory.members() {
            let lookup = Arc::clone(&self.lookup);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.timeout;

            tasks.spawn(async move {
                // The semaphore is never closed, so acquire only fails if it were
                let _permit = semaphore.acquire_owned().await;
                let lookup_started = Instant::now();
                let result = match tokio::time::timeout(timeout, lookup.lookup(rank, node)).await {
                    Ok(result) => result,
                    Err(_) => Err(LookupError::Timeout(timeout)),
                };
                (rank, node, result, lookup_started.elapsed())
            });
        }

        let mut aborted = abort.is_triggered();
        while !aborted {
            tokio::select! {
                biased;
                _ = abort.triggered() => {
                    tracing::warn!(in_flight = tasks.len(), "collection aborted");
                    aborted = true;
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok((rank, node, result, elapsed))) => {
                        stats.record_lookup(elapsed);
                        let entry = match result {
                            Ok(coordinate) => {
                                tracing::debug!(rank, node = %node, %coordinate, ?elapsed, "placement resolved");
                                ReportEntry::resolved(rank, node, coordinate)
                            }
                            Err(err) => {
                                tracing::warn!(rank, node = %node, "lookup failed: {}", err);
                                ReportEntry::failed(rank, Some(node), FailureReason::from(&err))
                            }
                        };
                        entries.insert(rank, entry);
                    }
                    Some(Err(e)) => {
                        // The rank is unknown here; it is filled in below
                        tracing::error!("lookup task failed: {}", e);
                    }
                },
            }
        }
        tasks.abort_all();

        // Anything still missing was abandoned or its task died
        let fallback = if aborted {
            FailureReason::Aborted
        } else {
            FailureReason::Transport
        };
        for rank in 0..size {
            entries
                .entry(rank)
                .or_insert_with(|| ReportEntry::failed(rank, directory.node_id(rank), fallback));
        }

        let report = Report::from_entries(entries.into_values().collect())
            .expect("collector fills exactly one entry per rank");
        stats.tally(&report);
        stats.set_elapsed(started.elapsed());

        Collection {
            outcome: CollectOutcome::from_report(report),
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmi::JobIdentity;
    use crate::topology::map::MeshMap;
    use crate::util::abort::abort_pair;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted lookup: per-rank delay and answer
    struct Scripted {
        delays: HashMap<Rank, Duration>,
        answers: HashMap<Rank, Result<Coordinate, LookupError>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl Scripted {
        fn new(answers: Vec<(Rank, Result<Coordinate, LookupError>)>) -> Self {
            Self {
                delays: HashMap::new(),
                answers: answers.into_iter().collect(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        fn delay(mut self, rank: Rank, delay: Duration) -> Self {
            self.delays.insert(rank, delay);
            self
        }
    }

    #[async_trait]
    impl PlacementLookup for Scripted {
        async fn lookup(&self, rank: Rank, node: NodeId) -> Result<Coordinate, LookupError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(&rank) {
                tokio::time::sleep(*delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.answers
                .get(&rank)
                .cloned()
                .unwrap_or(Err(LookupError::TopologyUnavailable(node)))
        }
    }

    fn registered(nodes: &[u32]) -> Directory {
        let dir = Directory::new(nodes.len());
        for (rank, &nid) in nodes.iter().enumerate() {
            dir.register(rank, NodeId(nid)).unwrap();
        }
        dir
    }

    fn scenario_map() -> Arc<MeshMap> {
        Arc::new(
            [
                (NodeId(10), Coordinate::new(0, 0, 0)),
                (NodeId(11), Coordinate::new(1, 0, 0)),
                (NodeId(12), Coordinate::new(0, 1, 0)),
                (NodeId(13), Coordinate::new(1, 1, 0)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[tokio::test]
    async fn test_all_lookups_succeed() {
        let dir = registered(&[10, 11, 12, 13]);
        let collector = Collector::new(
            Arc::new(LocalLookup::new(scenario_map())),
            Duration::from_secs(1),
            8,
        );

        let collection = collector.collect(&dir, &AbortSignal::never()).await;
        assert!(collection.outcome.is_complete());

        let coords: Vec<_> = collection
            .outcome
            .report()
            .entries()
            .iter()
            .map(|e| e.coordinate().unwrap())
            .collect();
        assert_eq!(
            coords,
            vec![
                Coordinate::new(0, 0, 0),
                Coordinate::new(1, 0, 0),
                Coordinate::new(0, 1, 0),
                Coordinate::new(1, 1, 0),
            ]
        );
        assert_eq!(collection.stats.resolved(), 4);
        assert_eq!(collection.stats.latency().len(), 4);
    }

    #[tokio::test]
    async fn test_report_has_n_entries_for_any_size() {
        for n in 1..=17usize {
            let nodes: Vec<u32> = (0..n as u32).collect();
            let dir = registered(&nodes);
            let topology = Arc::new(crate::topology::torus::TorusLayout::new([4, 4, 4], 1).unwrap());
            let collector = Collector::new(Arc::new(LocalLookup::new(topology)), Duration::from_secs(1), 3);

            let collection = collector.collect(&dir, &AbortSignal::never()).await;
            let ranks: Vec<_> = collection.outcome.report().entries().iter().map(|e| e.rank).collect();
            assert_eq!(ranks, (0..n).collect::<Vec<_>>());
            assert!(collection.outcome.is_complete());
        }
    }

    #[tokio::test]
    async fn test_timeout_marks_only_slow_rank() {
        let dir = registered(&[10, 11, 12]);
        let lookup = Scripted::new(vec![
            (0, Ok(Coordinate::new(0, 0, 0))),
            (1, Ok(Coordinate::new(1, 0, 0))),
            (2, Ok(Coordinate::new(0, 1, 0))),
        ])
        .delay(1, Duration::from_secs(30));
        let collector = Collector::new(Arc::new(lookup), Duration::from_millis(50), 4);

        let collection = collector.collect(&dir, &AbortSignal::never()).await;
        let report = collection.outcome.report();

        assert_eq!(report.len(), 3);
        assert_eq!(report.entries()[1].failure(), Some(FailureReason::Timeout));
        assert_eq!(report.entries()[0].coordinate(), Some(Coordinate::new(0, 0, 0)));
        assert_eq!(report.entries()[2].coordinate(), Some(Coordinate::new(0, 1, 0)));
        assert!(matches!(
            collection.outcome,
            CollectOutcome::PartialSuccess { ref failed_ranks, .. } if *failed_ranks == BTreeSet::from([1])
        ));
        assert_eq!(collection.outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_node_does_not_cascade() {
        let dir = registered(&[10, 99, 12]);
        let collector = Collector::new(
            Arc::new(LocalLookup::new(scenario_map())),
            Duration::from_secs(1),
            2,
        );

        let collection = collector.collect(&dir, &AbortSignal::never()).await;
        let report = collection.outcome.report();

        assert_eq!(report.entries()[1].failure(), Some(FailureReason::TopologyUnavailable));
        assert_eq!(report.entries()[1].node_id, Some(NodeId(99)));
        assert!(report.entries()[0].coordinate().is_some());
        assert!(report.entries()[2].coordinate().is_some());
    }

    #[tokio::test]
    async fn test_out_of_order_completion_sorted() {
        let dir = registered(&[10, 11, 12, 13]);
        // Rank 0 finishes last, rank 3 first
        let lookup = Scripted::new(vec![
            (0, Ok(Coordinate::new(0, 0, 0))),
            (1, Ok(Coordinate::new(1, 0, 0))),
            (2, Ok(Coordinate::new(0, 1, 0))),
            (3, Ok(Coordinate::new(1, 1, 0))),
        ])
        .delay(0, Duration::from_millis(80))
        .delay(1, Duration::from_millis(60))
        .delay(2, Duration::from_millis(40))
        .delay(3, Duration::from_millis(5));
        let collector = Collector::new(Arc::new(lookup), Duration::from_secs(5), 4);

        let collection = collector.collect(&dir, &AbortSignal::never()).await;
        let ranks: Vec<_> = collection.outcome.report().entries().iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(collection.outcome.is_complete());
    }

    #[tokio::test]
    async fn test_unregistered_rank_marked() {
        let dir = Directory::new(3);
        dir.register(0, NodeId(10)).unwrap();
        dir.register(2, NodeId(12)).unwrap();
        let collector = Collector::new(
            Arc::new(LocalLookup::new(scenario_map())),
            Duration::from_secs(1),
            4,
        );

        let collection = collector.collect(&dir, &AbortSignal::never()).await;
        let entry = collection.outcome.report().entries()[1];
        assert_eq!(entry.node_id, None);
        assert_eq!(entry.failure(), Some(FailureReason::Unregistered));
        assert_eq!(collection.stats.latency().len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_cap() {
        let nodes: Vec<u32> = (0..12).collect();
        let dir = registered(&nodes);
        let mut lookup = Scripted::new((0..12).map(|r| (r, Ok(Coordinate::new(r as i32, 0, 0)))).collect());
        for rank in 0..12 {
            lookup = lookup.delay(rank, Duration::from_millis(10));
        }
        let lookup = Arc::new(lookup);
        let collector = Collector::new(Arc::clone(&lookup), Duration::from_secs(5), 3);

        let collection = collector.collect(&dir, &AbortSignal::never()).await;
        assert!(collection.outcome.is_complete());
        assert!(lookup.peak_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_abort_yields_partial_report() {
        let dir = registered(&[10, 11, 12]);
        let lookup = Scripted::new(vec![
            (0, Ok(Coordinate::new(0, 0, 0))),
            (1, Ok(Coordinate::new(1, 0, 0))),
            (2, Ok(Coordinate::new(0, 1, 0))),
        ])
        .delay(1, Duration::from_secs(30))
        .delay(2, Duration::from_secs(30));
        let collector = Collector::new(Arc::new(lookup), Duration::from_secs(60), 4);

        let (trigger, signal) = abort_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let collection = tokio::time::timeout(Duration::from_secs(5), collector.collect(&dir, &signal))
            .await
            .unwrap();
        let report = collection.outcome.report();

        assert_eq!(report.len(), 3);
        assert!(report.entries()[0].coordinate().is_some());
        assert_eq!(report.entries()[1].failure(), Some(FailureReason::Aborted));
        assert_eq!(report.entries()[2].failure(), Some(FailureReason::Aborted));
        assert_eq!(report.entries()[2].node_id, Some(NodeId(12)));
        assert!(!collection.outcome.is_complete());
    }

    #[tokio::test]
    async fn test_agent_answers_only_own_rank() {
        let identity = JobIdentity::new(0, 2).unwrap();
        let agent = ParticipantAgent::new(identity, NodeId(10), scenario_map());

        assert_eq!(agent.lookup(0, NodeId(10)).await.unwrap(), Coordinate::new(0, 0, 0));
        assert!(matches!(
            agent.lookup(1, NodeId(11)).await,
            Err(LookupError::Transport(_))
        ));
    }
}
