//! Topology resolution
//!
//! Maps a node id to its position in the interconnect mesh. Resolvers are
//! read-only after construction and shared across lookup tasks.
//!
//! # Resolvers
//!
//! - [`map::MeshMap`]: explicit node → coordinate table loaded from TOML
//! - [`torus::TorusLayout`]: coordinates computed from mesh dimensions

pub mod map;
pub mod torus;

use crate::config::TopologyConfig;
use crate::error::LookupError;
use crate::pmi::NodeId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Position of a node in the 3D mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl From<[i32; 3]> for Coordinate {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Node id → mesh coordinate resolver
///
/// Implementations must answer consistently for the lifetime of a job: the same
/// node id always yields the same coordinate or the same error.
pub trait TopologyResolver: Send + Sync {
    /// Look up the coordinate of `node`
    ///
    /// Fails with [`LookupError::TopologyUnavailable`] for nodes outside the mesh
    /// or in a reserved partition.
    fn lookup_coordinate(&self, node: NodeId) -> Result<Coordinate, LookupError>;
}

/// Build the resolver described by the topology configuration
pub fn build_resolver(config: &TopologyConfig) -> Result<Arc<dyn TopologyResolver>> {
    let resolver: Arc<dyn TopologyResolver> = match config {
        TopologyConfig::Map { path, reserved } => {
            let mut mesh = map::MeshMap::from_file(path)
                .with_context(|| format!("Failed to load mesh map: {}", path.display()))?;
            mesh.reserve(reserved.iter().copied().map(NodeId));
            Arc::new(mesh)
        }
        TopologyConfig::Torus {
            dims,
            nodes_per_router,
            reserved,
        } => {
            let layout = torus::TorusLayout::new(*dims, *nodes_per_router)?
                .with_reserved(reserved.iter().copied().map(NodeId));
            Arc::new(layout)
        }
    };

    Ok(resolver)
}
