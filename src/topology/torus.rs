//! Computed torus layout
//!
//! Node ids are assigned to routers in order, `nodes_per_router` nodes per
//! router, and routers are laid out x-fastest:
//!
//! ```text
//! router = nid / nodes_per_router
//! x = router % X
//! y = (router / X) % Y
//! z = router / (X * Y)
//! ```
//!
//! Node ids past the last router are outside the mesh.

use super::{Coordinate, TopologyResolver};
use crate::error::LookupError;
use crate::pmi::NodeId;
use anyhow::Result;
use std::collections::HashSet;

/// Mesh dimensions plus router fan-out
#[derive(Debug, Clone)]
pub struct TorusLayout {
    dims: [u32; 3],
    nodes_per_router: u32,
    routers: u64,
    reserved: HashSet<NodeId>,
}

/// Router count for `dims`, or `None` if it does not fit in a `u64`
pub fn mesh_routers(dims: [u32; 3]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
}

impl TorusLayout {
    /// Create a layout, rejecting zero-sized dimensions
    pub fn new(dims: [u32; 3], nodes_per_router: u32) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            anyhow::bail!("torus dimensions must be non-zero, got {:?}", dims);
        }
        if nodes_per_router == 0 {
            anyhow::bail!("nodes_per_router must be at least 1");
        }
        if dims.iter().any(|&d| d > i32::MAX as u32) {
            anyhow::bail!("torus dimensions exceed coordinate range: {:?}", dims);
        }
        let routers = mesh_routers(dims)
            .ok_or_else(|| anyhow::anyhow!("torus dimensions {:?} describe too many routers", dims))?;

        Ok(Self {
            dims,
            nodes_per_router,
            routers,
            reserved: HashSet::new(),
        })
    }

    pub fn with_reserved(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.reserved.extend(nodes);
        self
    }

    /// Total routers in the mesh
    pub fn router_count(&self) -> u64 {
        self.routers
    }
}

impl TopologyResolver for TorusLayout {
    fn lookup_coordinate(&self, node: NodeId) -> Result<Coordinate, LookupError> {
        if self.reserved.contains(&node) {
            return Err(LookupError::TopologyUnavailable(node));
        }

        let router = (node.0 / self.nodes_per_router) as u64;
        if router >= self.router_count() {
            return Err(LookupError::TopologyUnavailable(node));
        }

        let [dx, dy, _] = self.dims.map(|d| d as u64);
        Ok(Coordinate::new(
            (router % dx) as i32,
            ((router / dx) % dy) as i32,
            (router / (dx * dy)) as i32,
        ))
    }
}
