//! Environment-driven process manager
//!
//! Launchers publish job identity through environment variables. This module
//! checks the common ones in priority order:
//!
//! | Value | Variables |
//! |-------|-----------|
//! | rank | `PMI_RANK`, `SLURM_PROCID`, `OMPI_COMM_WORLD_RANK`, `ALPS_APP_PE` |
//! | size | `PMI_SIZE`, `SLURM_NTASKS`, `OMPI_COMM_WORLD_SIZE` |
//! | own node id | `PMI_NID`, then `/proc/cray_xt/nid` |
//! | node map | `MESHCOORD_NODE_MAP` (e.g. `"10,11,12-15"`) or `job.node_map` |
//!
//! Without a node map only this process's own node id can be resolved, which is
//! enough for agent mode but not for local collection.

use super::{JobIdentity, NodeId, ProcessManager, Rank};
use crate::error::InitError;
use std::collections::HashMap;
use std::path::PathBuf;

const RANK_VARS: &[&str] = &["PMI_RANK", "SLURM_PROCID", "OMPI_COMM_WORLD_RANK", "ALPS_APP_PE"];
const SIZE_VARS: &[&str] = &["PMI_SIZE", "SLURM_NTASKS", "OMPI_COMM_WORLD_SIZE"];
// SLURM_NODEID is an index into the job allocation, not a system nid
const NID_VARS: &[&str] = &["PMI_NID"];

/// Variable holding the per-rank node map
pub const NODE_MAP_VAR: &str = "MESHCOORD_NODE_MAP";

/// Cray compute nodes expose their nid here
const CRAY_NID_FILE: &str = "/proc/cray_xt/nid";

/// Process manager backed by launcher environment variables
#[derive(Debug)]
pub struct EnvLauncher {
    vars: HashMap<String, String>,
    nid_file: Option<PathBuf>,
    configured_map: Option<String>,
    state: Option<Resolved>,
}

#[derive(Debug)]
struct Resolved {
    identity: JobIdentity,
    own_nid: Option<NodeId>,
    node_map: Option<Vec<NodeId>>,
}

impl EnvLauncher {
    /// Snapshot the current process environment
    pub fn from_env() -> Self {
        let mut launcher = Self::from_vars(std::env::vars().collect());
        launcher.nid_file = Some(PathBuf::from(CRAY_NID_FILE));
        launcher
    }

    /// Use an explicit variable set (no nid file fallback)
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self {
            vars,
            nid_file: None,
            configured_map: None,
            state: None,
        }
    }

    /// Supply a node map list (e.g. `"10-13"`) from configuration
    ///
    /// A `MESHCOORD_NODE_MAP` variable takes precedence over this.
    pub fn with_node_map(mut self, map: Option<String>) -> Self {
        self.configured_map = map;
        self
    }

    fn first_of(&self, names: &[&'static str]) -> Option<(&'static str, &str)> {
        names.iter().find_map(|name| {
            self.vars
                .get(*name)
                .map(|value| (*name, value.trim()))
                .filter(|(_, value)| !value.is_empty())
        })
    }

    fn required_usize(&self, what: &'static str, names: &[&'static str]) -> Result<usize, InitError> {
        let (var, value) = self.first_of(names).ok_or_else(|| InitError::MissingVariable {
            what,
            vars: names.join(", "),
        })?;
        value.parse().map_err(|_| InitError::InvalidVariable {
            var: var.to_string(),
            value: value.to_string(),
        })
    }

    fn own_node_id(&self) -> Result<Option<NodeId>, InitError> {
        if let Some((var, value)) = self.first_of(NID_VARS) {
            let nid = value.parse().map_err(|_| InitError::InvalidVariable {
                var: var.to_string(),
                value: value.to_string(),
            })?;
            return Ok(Some(NodeId(nid)));
        }

        // Absent file is not an error: off-Cray nodes simply have no nid
        if let Some(ref path) = self.nid_file {
            if let Ok(contents) = std::fs::read_to_string(path) {
                if let Ok(nid) = contents.trim().parse() {
                    return Ok(Some(NodeId(nid)));
                }
            }
        }

        Ok(None)
    }

    /// Node map for a group of `size` ranks, counted before it is expanded
    fn node_map(&self, size: usize) -> Result<Option<Vec<NodeId>>, InitError> {
        let (var, list) = match (self.vars.get(NODE_MAP_VAR), &self.configured_map) {
            (Some(list), _) => (NODE_MAP_VAR, list),
            (None, Some(list)) => ("job.node_map", list),
            (None, None) => return Ok(None),
        };
        let invalid = || InitError::InvalidVariable {
            var: var.to_string(),
            value: list.clone(),
        };

        let entries = node_map_len(list).ok_or_else(invalid)?;
        if entries != size as u64 {
            return Err(InitError::NodeMapMismatch {
                entries: usize::try_from(entries).unwrap_or(usize::MAX),
                size,
            });
        }
        parse_node_map(list).map(Some).ok_or_else(invalid)
    }
}

impl ProcessManager for EnvLauncher {
    fn init(&mut self) -> Result<JobIdentity, InitError> {
        if self.state.is_some() {
            return Err(InitError::AlreadyInitialized);
        }

        let rank = self.required_usize("rank", RANK_VARS)?;
        let size = self.required_usize("group size", SIZE_VARS)?;
        let identity = JobIdentity::new(rank, size)?;

        let node_map = self.node_map(size)?;
        let own_nid = self.own_node_id()?;

        self.state = Some(Resolved {
            identity,
            own_nid,
            node_map,
        });
        Ok(identity)
    }

    fn resolve_node_id(&self, rank: Rank) -> Result<NodeId, InitError> {
        let state = self.state.as_ref().ok_or(InitError::NotInitialized)?;

        if let Some(ref map) = state.node_map {
            return map.get(rank).copied().ok_or(InitError::NodeIdUnavailable(rank));
        }

        if rank == state.identity.rank {
            return state.own_nid.ok_or(InitError::NodeIdUnavailable(rank));
        }

        Err(InitError::NodeIdUnavailable(rank))
    }

    fn finalize(&mut self) {
        self.state = None;
    }
}

/// Split a node map list into inclusive `(from, to)` spans
fn spans(list: &str) -> Option<Vec<(u32, u32)>> {
    let mut spans = Vec::new();

    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((from, to)) => spans.push((from.trim().parse().ok()?, to.trim().parse().ok()?)),
            None => {
                let nid = part.parse().ok()?;
                spans.push((nid, nid));
            }
        }
    }

    if spans.is_empty() {
        None
    } else {
        Some(spans)
    }
}

/// Number of entries a node map list expands to, without expanding it
pub fn node_map_len(list: &str) -> Option<u64> {
    spans(list).map(|spans| spans.iter().map(|&(from, to)| from.abs_diff(to) as u64 + 1).sum())
}

/// Parse a node map such as `"10,11,20-23"` into per-rank node ids
///
/// Ranges are inclusive and may descend. Returns `None` on any malformed entry.
/// The result is not bounded; check [`node_map_len`] first for untrusted input.
pub fn parse_node_map(list: &str) -> Option<Vec<NodeId>> {
    let mut map = Vec::new();

    for (from, to) in spans(list)? {
        if from <= to {
            map.extend((from..=to).map(NodeId));
        } else {
            map.extend((to..=from).rev().map(NodeId));
        }
    }
    Some(map)
}
