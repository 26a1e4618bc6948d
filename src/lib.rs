//! meshcoord - mesh coordinates of every rank in a parallel job
//!
//! Each process of a job resolves which interconnect mesh position its node
//! occupies; an elected leader gathers every rank's coordinate and prints a
//! rank-ordered report.
//!
//! # Architecture
//!
//! - **Process management** (`pmi`): job identity and node ids from the launcher
//! - **Topology** (`topology`): node id → mesh coordinate resolvers
//! - **Participant agent** (`agent`): a rank's memoized view of its own placement
//! - **Registration directory** (`directory`): write-once rank → node table
//! - **Collector** (`collector`): concurrent, timeout-bounded lookups on the leader
//! - **Agents mode** (`distributed`): leader/agent wire protocol over TCP
//! - **Report** (`report`, `output`): classified outcome, text and JSON renderings
//! - **Job** (`job`): lifecycle, roles and teardown

pub mod agent;
pub mod collector;
pub mod config;
pub mod directory;
pub mod distributed;
pub mod error;
pub mod job;
pub mod output;
pub mod pmi;
pub mod report;
pub mod stats;
pub mod topology;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use job::run_job;
pub use report::{CollectOutcome, Report};

/// Result type used throughout meshcoord
pub type Result<T> = anyhow::Result<T>;
