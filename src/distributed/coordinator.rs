//! Leader side of agents mode
//!
//! The leader:
//! - Binds the registration endpoint
//! - Accepts one registration per rank until the group is complete, the
//!   registration window closes, or the job is aborted
//! - Keeps each agent's connection open to send lookups over it
//! - Sends SHUTDOWN to every agent once collection is done

use crate::agent::ParticipantAgent;
use crate::collector::PlacementLookup;
use crate::directory::Directory;
use crate::distributed::protocol::*;
use crate::error::{InitError, LookupError, RegistryError};
use crate::pmi::{NodeId, Rank};
use crate::topology::Coordinate;
use crate::util::abort::AbortSignal;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Bind the registration endpoint
pub async fn bind_endpoint(addr: &str) -> Result<TcpListener, InitError> {
    TcpListener::bind(addr).await.map_err(|e| InitError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Registered agents, reachable by rank
pub struct AgentPool {
    local: Arc<ParticipantAgent>,
    connections: BTreeMap<Rank, Mutex<TcpStream>>,
}

impl AgentPool {
    /// Number of remote agents connected
    pub fn remote_count(&self) -> usize {
        self.connections.len()
    }

    /// Tell every agent collection is over
    ///
    /// Best effort: an agent that already went away is only logged.
    pub async fn shutdown(&self) {
        for (rank, conn) in &self.connections {
            let mut stream = conn.lock().await;
            if let Err(e) = write_message(&mut *stream, &Message::Shutdown).await {
                tracing::debug!(rank = *rank, "shutdown not delivered: {:#}", e);
            }
        }
    }

    async fn remote_lookup(stream: &mut TcpStream, rank: Rank, node: NodeId) -> Result<Coordinate, LookupError> {
        write_message(stream, &Message::Lookup(LookupMessage { rank }))
            .await
            .map_err(transport)?;

        match read_message(stream).await.map_err(transport)? {
            Message::Placement(p) if p.rank == rank => {
                if p.node_id != node {
                    tracing::warn!(rank, registered = %node, answered = %p.node_id, "agent reports a different node");
                }
                Ok(p.coordinate)
            }
            Message::LookupFailed(f) if f.rank == rank => Err(f.into_error()),
            Message::Error(e) => Err(LookupError::Transport(e.error)),
            other => Err(LookupError::Transport(format!(
                "unexpected reply to lookup for rank {}: {:?}",
                rank, other
            ))),
        }
    }
}

fn transport(err: anyhow::Error) -> LookupError {
    LookupError::Transport(format!("{:#}", err))
}

#[async_trait]
impl PlacementLookup for AgentPool {
    async fn lookup(&self, rank: Rank, node: NodeId) -> Result<Coordinate, LookupError> {
        if rank == self.local.rank() {
            return self.local.lookup(rank, node).await;
        }

        let conn = self
            .connections
            .get(&rank)
            .ok_or_else(|| LookupError::Transport(format!("no connection to rank {}", rank)))?;
        let mut stream = conn.lock().await;
        Self::remote_lookup(&mut stream, rank, node).await
    }
}

/// Outcome of reading one agent's REGISTER
enum Handshake {
    Registered(RegisterMessage, TcpStream, SocketAddr),
    Rejected,
}

async fn handshake(mut stream: TcpStream, peer: SocketAddr, group_size: usize, deadline: Instant) -> Handshake {
    let msg = match tokio::time::timeout_at(deadline, read_message(&mut stream)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => {
            tracing::warn!(%peer, "bad registration: {:#}", e);
            return Handshake::Rejected;
        }
        Err(_) => {
            tracing::warn!(%peer, "registration window closed before agent registered");
            return Handshake::Rejected;
        }
    };

    let reject = match msg {
        Message::Register(reg) if reg.protocol_version != PROTOCOL_VERSION => ErrorMessage {
            rank: Some(reg.rank),
            error: format!(
                "Protocol version mismatch: leader={}, agent={}",
                PROTOCOL_VERSION, reg.protocol_version
            ),
        },
        Message::Register(reg) if reg.group_size != group_size => ErrorMessage {
            rank: Some(reg.rank),
            error: format!(
                "Group size mismatch: leader={}, agent={}",
                group_size, reg.group_size
            ),
        },
        Message::Register(reg) => return Handshake::Registered(reg, stream, peer),
        other => ErrorMessage {
            rank: None,
            error: format!("Expected REGISTER, got {:?}", other),
        },
    };

    tracing::warn!(%peer, "rejecting agent: {}", reject.error);
    let _ = write_message(&mut stream, &Message::Error(reject)).await;
    Handshake::Rejected
}

/// Accept registrations until every rank of `directory` is present
///
/// The leader's own agent is registered first. Stragglers are left missing in
/// the directory when `window` closes or `abort` fires; the collector marks
/// them. A second registration for a rank is fatal for the job.
pub async fn gather_agents(
    listener: TcpListener,
    directory: &Directory,
    local: Arc<ParticipantAgent>,
    window: Duration,
    abort: &AbortSignal,
) -> Result<AgentPool> {
    directory.register(local.rank(), local.node_id())?;

    let deadline = Instant::now() + window;
    let group_size = directory.group_size();
    let mut connections = BTreeMap::new();
    let mut handshakes = JoinSet::new();

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, group_size, "waiting for agents to register");
    }

    while !directory.is_complete() {
        tokio::select! {
            biased;
            _ = abort.triggered() => {
                tracing::warn!(missing = ?directory.missing(), "registration aborted");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(missing = ?directory.missing(), "registration window closed");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "agent connected");
                    handshakes.spawn(handshake(stream, peer, group_size, deadline));
                }
                Err(e) => tracing::warn!("accept failed: {}", e),
            },
            Some(done) = handshakes.join_next() => {
                let Ok(Handshake::Registered(reg, mut stream, peer)) = done else {
                    continue;
                };

                match directory.register(reg.rank, reg.node_id) {
                    Ok(()) => {
                        let ack = Message::RegisterAck(RegisterAckMessage {
                            protocol_version: PROTOCOL_VERSION,
                            rank: reg.rank,
                        });
                        if let Err(e) = write_message(&mut stream, &ack).await {
                            // The registration stands; lookups to this rank will fail
                            tracing::warn!(rank = reg.rank, "ack not delivered: {:#}", e);
                        }
                        tracing::debug!(
                            rank = reg.rank,
                            node = %reg.node_id,
                            host = %reg.hostname,
                            %peer,
                            registered = directory.registered(),
                            "agent registered"
                        );
                        connections.insert(reg.rank, Mutex::new(stream));
                    }
                    Err(err @ RegistryError::DuplicateRank { .. }) => {
                        let reply = ErrorMessage {
                            rank: Some(reg.rank),
                            error: err.to_string(),
                        };
                        let _ = write_message(&mut stream, &Message::Error(reply)).await;
                        return Err(err.into());
                    }
                    Err(err) => {
                        tracing::warn!(%peer, "rejecting agent: {}", err);
                        let reply = ErrorMessage {
                            rank: Some(reg.rank),
                            error: err.to_string(),
                        };
                        let _ = write_message(&mut stream, &Message::Error(reply)).await;
                    }
                }
            }
        }
    }

    handshakes.abort_all();
    Ok(AgentPool { local, connections })
}
