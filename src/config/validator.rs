//! Configuration validation

use super::*;
use crate::pmi::env::node_map_len;
use crate::topology::torus::mesh_routers;
use anyhow::Result;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_job(&config.job)?;
    validate_collector(&config.collector)?;
    validate_agent(&config.agent)?;
    if let Some(ref topology) = config.topology {
        validate_topology(topology)?;
    }

    Ok(())
}

/// Validate job configuration
pub fn validate_job(job: &JobConfig) -> Result<()> {
    if job.mode == CollectionMode::Agents {
        let (host, port) = job
            .leader_addr
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("leader_addr must be host:port, got {:?}", job.leader_addr))?;
        if host.is_empty() {
            anyhow::bail!("leader_addr is missing a host: {:?}", job.leader_addr);
        }
        port.parse::<u16>()
            .map_err(|_| anyhow::anyhow!("leader_addr has an invalid port: {:?}", job.leader_addr))?;
    }

    if let Some(ref map) = job.node_map {
        if node_map_len(map).is_none() {
            anyhow::bail!("node_map is malformed: {:?}", map);
        }
    }

    Ok(())
}

/// Validate collector configuration
pub fn validate_collector(collector: &CollectorConfig) -> Result<()> {
    if collector.lookup_timeout_ms == 0 {
        anyhow::bail!("lookup_timeout_ms must be greater than 0");
    }
    if collector.registration_timeout_ms == 0 {
        anyhow::bail!("registration_timeout_ms must be greater than 0");
    }
    if collector.max_in_flight == 0 {
        anyhow::bail!("max_in_flight must be at least 1");
    }

    Ok(())
}

/// Validate agent configuration
pub fn validate_agent(agent: &AgentConfig) -> Result<()> {
    if agent.connect_timeout_ms == 0 {
        anyhow::bail!("connect_timeout_ms must be greater than 0");
    }
    if agent.serve_timeout_ms == 0 {
        anyhow::bail!("serve_timeout_ms must be greater than 0");
    }

    Ok(())
}

/// Validate topology configuration
pub fn validate_topology(topology: &TopologyConfig) -> Result<()> {
    match topology {
        TopologyConfig::Map { path, .. } => {
            if path.as_os_str().is_empty() {
                anyhow::bail!("topology map path must not be empty");
            }
        }
        TopologyConfig::Torus {
            dims,
            nodes_per_router,
            ..
        } => {
            if dims.iter().any(|&d| d == 0) {
                anyhow::bail!("torus dims must all be non-zero, got {:?}", dims);
            }
            if *nodes_per_router == 0 {
                anyhow::bail!("nodes_per_router must be at least 1");
            }
            if dims.iter().any(|&d| d > i32::MAX as u32) {
                anyhow::bail!("torus dims exceed the coordinate range, got {:?}", dims);
            }
            if mesh_routers(*dims).is_none() {
                anyhow::bail!("torus dims {:?} describe too many routers", dims);
            }
        }
    }

    Ok(())
}
