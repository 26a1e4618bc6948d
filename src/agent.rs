//! Participant agent
//!
//! Every rank owns one agent. The agent knows its own identity and node and can
//! resolve its placement on demand. The first answer (coordinate or error) is
//! memoized, so repeated queries within a job always agree even if the
//! underlying resolver were to change its mind.

use crate::error::LookupError;
use crate::pmi::{JobIdentity, NodeId, Rank};
use crate::topology::{Coordinate, TopologyResolver};
use std::sync::{Arc, OnceLock};

/// A rank's resolved position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub rank: Rank,
    pub node_id: NodeId,
    pub coordinate: Coordinate,
}

/// Per-process placement agent
pub struct ParticipantAgent {
    identity: JobIdentity,
    node_id: NodeId,
    topology: Arc<dyn TopologyResolver>,
    resolved: OnceLock<Result<Coordinate, LookupError>>,
}

impl ParticipantAgent {
    pub fn new(identity: JobIdentity, node_id: NodeId, topology: Arc<dyn TopologyResolver>) -> Self {
        Self {
            identity,
            node_id,
            topology,
            resolved: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> JobIdentity {
        self.identity
    }

    pub fn rank(&self) -> Rank {
        self.identity.rank
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Resolve this rank's placement
    ///
    /// Fails with [`LookupError::TopologyUnavailable`] when the node has no mesh
    /// coordinate. Idempotent for the lifetime of the agent.
    pub fn resolve_self(&self) -> Result<Placement, LookupError> {
        let coordinate = self
            .resolved
            .get_or_init(|| self.topology.lookup_coordinate(self.node_id))
            .clone()?;

        Ok(Placement {
            rank: self.identity.rank,
            node_id: self.node_id,
            coordinate,
        })
    }
}

impl std::fmt::Debug for ParticipantAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantAgent")
            .field("identity", &self.identity)
            .field("node_id", &self.node_id)
            .field("resolved", &self.resolved.get())
            .finish()
    }
}
