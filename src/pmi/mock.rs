//! In-memory process manager
//!
//! `StaticLauncher` hands out a fixed identity and node map, which lets a whole
//! job be driven inside one test process.
//!
//! # Example
//!
//! ```
//! use meshcoord::pmi::{NodeId, ProcessManager};
//! use meshcoord::pmi::mock::StaticLauncher;
//!
//! let mut launcher = StaticLauncher::new(0, vec![NodeId(10), NodeId(11)]);
//! let identity = launcher.init().unwrap();
//! assert_eq!(identity.size, 2);
//! assert_eq!(launcher.resolve_node_id(1).unwrap(), NodeId(11));
//! launcher.finalize();
//! assert_eq!(launcher.finalize_count(), 1);
//! ```

use super::{JobIdentity, NodeId, ProcessManager, Rank};
use crate::error::InitError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Process manager with a fixed identity
#[derive(Debug, Clone)]
pub struct StaticLauncher {
    rank: Rank,
    node_ids: Vec<NodeId>,
    init_error: Option<InitError>,
    initialized: bool,
    finalize_calls: Arc<AtomicUsize>,
}

impl StaticLauncher {
    /// Create a launcher for `rank` in a group sized by `node_ids`
    pub fn new(rank: Rank, node_ids: Vec<NodeId>) -> Self {
        Self {
            rank,
            node_ids,
            init_error: None,
            initialized: false,
            finalize_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `init()` fail with `err`
    pub fn failing(mut self, err: InitError) -> Self {
        self.init_error = Some(err);
        self
    }

    /// Number of `finalize()` calls observed, shared across clones
    pub fn finalize_count(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    /// Shared counter handle, readable after the launcher is moved away
    pub fn finalize_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.finalize_calls)
    }
}

impl ProcessManager for StaticLauncher {
    fn init(&mut self) -> Result<JobIdentity, InitError> {
        if let Some(ref err) = self.init_error {
            return Err(err.clone());
        }
        if self.initialized {
            return Err(InitError::AlreadyInitialized);
        }

        let identity = JobIdentity::new(self.rank, self.node_ids.len())?;
        self.initialized = true;
        Ok(identity)
    }

    fn resolve_node_id(&self, rank: Rank) -> Result<NodeId, InitError> {
        if !self.initialized {
            return Err(InitError::NotInitialized);
        }
        self.node_ids
            .get(rank)
            .copied()
            .ok_or(InitError::NodeIdUnavailable(rank))
    }

    fn finalize(&mut self) {
        self.initialized = false;
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
    }
}
