//! Explicit mesh map
//!
//! A TOML table of node ids and their coordinates, typically exported once from
//! the system's topology database:
//!
//! ```toml
//! reserved = [0, 1]
//!
//! [[node]]
//! nid = 10
//! coords = [0, 0, 0]
//!
//! [[node]]
//! nid = 11
//! coords = [1, 0, 0]
//! ```

use super::{Coordinate, TopologyResolver};
use crate::error::LookupError;
use crate::pmi::NodeId;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct MeshMapFile {
    #[serde(default)]
    reserved: Vec<u32>,
    #[serde(default, rename = "node")]
    nodes: Vec<NodeEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    nid: u32,
    coords: [i32; 3],
}

/// Node → coordinate table
#[derive(Debug, Default, Clone)]
pub struct MeshMap {
    coords: HashMap<NodeId, Coordinate>,
    reserved: HashSet<NodeId>,
}

impl MeshMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a map from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mesh map: {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Parse a map from TOML text
    ///
    /// A node listed twice is rejected rather than silently overwritten.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: MeshMapFile = toml::from_str(contents).context("Failed to parse mesh map")?;

        let mut map = Self::new();
        for entry in file.nodes {
            if map.coords.insert(NodeId(entry.nid), entry.coords.into()).is_some() {
                anyhow::bail!("node {} listed more than once in mesh map", entry.nid);
            }
        }
        map.reserve(file.reserved.into_iter().map(NodeId));

        Ok(map)
    }

    /// Add a node
    pub fn insert(&mut self, node: NodeId, coord: Coordinate) {
        self.coords.insert(node, coord);
    }

    /// Mark nodes as reserved (never resolvable)
    pub fn reserve(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.reserved.extend(nodes);
    }

    /// Number of mapped nodes
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

impl FromIterator<(NodeId, Coordinate)> for MeshMap {
    fn from_iter<I: IntoIterator<Item = (NodeId, Coordinate)>>(iter: I) -> Self {
        Self {
            coords: iter.into_iter().collect(),
            reserved: HashSet::new(),
        }
    }
}

impl TopologyResolver for MeshMap {
    fn lookup_coordinate(&self, node: NodeId) -> Result<Coordinate, LookupError> {
        if self.reserved.contains(&node) {
            return Err(LookupError::TopologyUnavailable(node));
        }
        self.coords
            .get(&node)
            .copied()
            .ok_or(LookupError::TopologyUnavailable(node))
    }
}
