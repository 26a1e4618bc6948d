//! Registration directory
//!
//! Holds the set of participants known to the job and the group size declared at
//! job start. Each rank registers at most once; a second registration for the
//! same rank is rejected rather than overwriting the first. Readers never block
//! writers for longer than a map lookup, so the directory can be shared between
//! the registration endpoint and the collector.

use crate::error::RegistryError;
use crate::pmi::{NodeId, Rank};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A registered job member
///
/// Coordinates are not kept here; they belong to the collection's report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub rank: Rank,
    pub node_id: NodeId,
}

/// Write-once-per-rank membership table
#[derive(Debug)]
pub struct Directory {
    size: usize,
    members: Mutex<BTreeMap<Rank, NodeId>>,
    changed: Notify,
}

impl Directory {
    /// Create an empty directory for a group of `size` ranks
    pub fn new(size: usize) -> Self {
        Self {
            size,
            members: Mutex::new(BTreeMap::new()),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Rank, NodeId>> {
        // Entries are only ever inserted whole, so a poisoned map is still consistent
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `rank` as running on `node_id`
    pub fn register(&self, rank: Rank, node_id: NodeId) -> Result<(), RegistryError> {
        if rank >= self.size {
            return Err(RegistryError::RankOutOfRange {
                rank,
                size: self.size,
            });
        }

        {
            let mut members = self.lock();
            if let Some(&existing) = members.get(&rank) {
                return Err(RegistryError::DuplicateRank {
                    rank,
                    existing,
                    attempted: node_id,
                });
            }
            members.insert(rank, node_id);
        }

        self.changed.notify_waiters();
        Ok(())
    }

    /// Declared group size
    pub fn group_size(&self) -> usize {
        self.size
    }

    /// Node id registered for `rank`, if any
    pub fn node_id(&self, rank: Rank) -> Option<NodeId> {
        self.lock().get(&rank).copied()
    }

    /// Registered participants in rank order
    pub fn members(&self) -> Vec<Participant> {
        self.lock()
            .iter()
            .map(|(&rank, &node_id)| Participant { rank, node_id })
            .collect()
    }

    /// Number of registered ranks
    pub fn registered(&self) -> usize {
        self.lock().len()
    }

    /// Ranks in `[0, size)` that have not registered, ascending
    pub fn missing(&self) -> Vec<Rank> {
        let members = self.lock();
        (0..self.size).filter(|r| !members.contains_key(r)).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.registered() == self.size
    }

    /// Wait until every rank has registered or `timeout` elapses
    ///
    /// Returns whether the directory is complete.
    pub async fn wait_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            // Arm before checking so a registration in between is not missed
            let notified = self.changed.notified();
            if self.is_complete() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_complete();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_and_members_ordered() {
        let dir = Directory::new(3);
        dir.register(2, NodeId(12)).unwrap();
        dir.register(0, NodeId(10)).unwrap();

        assert_eq!(
            dir.members(),
            vec![
                Participant { rank: 0, node_id: NodeId(10) },
                Participant { rank: 2, node_id: NodeId(12) },
            ]
        );
        assert_eq!(dir.missing(), vec![1]);
        assert!(!dir.is_complete());
        assert_eq!(dir.group_size(), 3);
        assert_eq!(dir.node_id(2), Some(NodeId(12)));
        assert_eq!(dir.node_id(1), None);
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let dir = Directory::new(2);
        dir.register(1, NodeId(5)).unwrap();

        assert_eq!(
            dir.register(1, NodeId(6)),
            Err(RegistryError::DuplicateRank {
                rank: 1,
                existing: NodeId(5),
                attempted: NodeId(6),
            })
        );
        // First registration wins
        assert_eq!(dir.node_id(1), Some(NodeId(5)));
    }

    #[test]
    fn test_rank_out_of_range() {
        let dir = Directory::new(2);
        assert_eq!(
            dir.register(2, NodeId(1)),
            Err(RegistryError::RankOutOfRange { rank: 2, size: 2 })
        );
    }

    #[tokio::test]
    async fn test_wait_complete_wakes_on_registration() {
        let dir = Arc::new(Directory::new(2));
        dir.register(0, NodeId(1)).unwrap();

        let late = Arc::clone(&dir);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            late.register(1, NodeId(2)).unwrap();
        });

        assert!(dir.wait_complete(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_wait_complete_times_out() {
        let dir = Directory::new(2);
        dir.register(0, NodeId(1)).unwrap();

        assert!(!dir.wait_complete(Duration::from_millis(30)).await);
        assert_eq!(dir.missing(), vec![1]);
    }
}
