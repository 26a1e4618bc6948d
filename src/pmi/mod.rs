//! Process-management abstraction
//!
//! A process manager is the launcher-side collaborator that tells each process
//! who it is within the job: its rank, the group size, and the node id each rank
//! runs on. Every failure from this layer is fatal to the job.
//!
//! # Lifecycle
//!
//! 1. `init()` once at job start, yielding the [`JobIdentity`]
//! 2. `resolve_node_id()` any number of times
//! 3. `finalize()` exactly once at job end, on success and failure paths alike
//!
//! The exactly-once teardown is enforced by [`crate::job::JobContext`], not by
//! implementations.
//!
//! # Implementations
//!
//! - [`env::EnvLauncher`]: reads PMI / SLURM / Open MPI / ALPS environment variables
//! - [`mock::StaticLauncher`]: in-memory identity for tests and simulation

pub mod env;
pub mod mock;

use crate::error::InitError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-based process identity within a job
pub type Rank = usize;

/// Identifier of the physical node hosting a rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of this process within the job group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobIdentity {
    /// This process's rank
    pub rank: Rank,

    /// Number of processes in the job (fixed at job start)
    pub size: usize,
}

impl JobIdentity {
    /// Build an identity, rejecting empty groups and out-of-range ranks
    pub fn new(rank: Rank, size: usize) -> Result<Self, InitError> {
        if size == 0 || rank >= size {
            return Err(InitError::InvalidGroup { rank, size });
        }
        Ok(Self { rank, size })
    }
}

/// Launcher-side process-management interface
pub trait ProcessManager: Send {
    /// Initialize and return this process's identity
    fn init(&mut self) -> Result<JobIdentity, InitError>;

    /// Resolve the node id hosting `rank`
    fn resolve_node_id(&self, rank: Rank) -> Result<NodeId, InitError>;

    /// Release launcher resources
    ///
    /// Called exactly once per job, whether or not `init()` succeeded.
    fn finalize(&mut self);
}
