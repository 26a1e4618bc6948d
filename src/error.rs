//! Error taxonomy
//!
//! Errors fall into two groups:
//!
//! - **Fatal**: [`InitError`] and [`RegistryError`]. The job cannot proceed without
//!   a valid identity and a consistent directory, so these abort the process after
//!   teardown.
//! - **Recoverable**: [`LookupError`]. A single rank's placement could not be
//!   resolved. The collector records a failure marker for that rank and keeps going.

use crate::pmi::{NodeId, Rank};
use std::time::Duration;
use thiserror::Error;

/// Process-management and job setup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// The process manager was initialized twice in one process
    #[error("process manager already initialized")]
    AlreadyInitialized,

    /// An operation needed an initialized process manager
    #[error("process manager not initialized")]
    NotInitialized,

    /// None of the launcher variables for a required value were set
    #[error("launcher did not provide {what} (looked for {vars})")]
    MissingVariable { what: &'static str, vars: String },

    /// A launcher variable was set but could not be parsed
    #[error("invalid value {value:?} for {var}")]
    InvalidVariable { var: String, value: String },

    /// Rank and size do not describe a valid group
    #[error("invalid job group: rank {rank} with group size {size}")]
    InvalidGroup { rank: Rank, size: usize },

    /// The node id of a rank cannot be determined
    #[error("node id unavailable for rank {0}")]
    NodeIdUnavailable(Rank),

    /// The per-rank node map does not cover the job group
    #[error("node map has {entries} entries but the job group has {size} ranks")]
    NodeMapMismatch { entries: usize, size: usize },

    /// Configuration could not be loaded or failed validation
    #[error("configuration error: {0}")]
    Config(String),

    /// The leader could not open its registration endpoint
    #[error("failed to bind registration endpoint {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

/// Registration directory violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A rank tried to register a second time
    #[error("rank {rank} registered twice (node {existing} then node {attempted})")]
    DuplicateRank {
        rank: Rank,
        existing: NodeId,
        attempted: NodeId,
    },

    /// A rank outside `[0, size)` tried to register
    #[error("rank {rank} is outside the job group of size {size}")]
    RankOutOfRange { rank: Rank, size: usize },
}

/// Per-rank placement lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The topology resolver has no coordinate for this node
    #[error("topology unavailable for node {0}")]
    TopologyUnavailable(NodeId),

    /// The lookup did not answer within the per-lookup timeout
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),

    /// The connection to the rank's agent failed mid-lookup
    #[error("agent transport failure: {0}")]
    Transport(String),
}
