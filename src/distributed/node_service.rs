//! Worker side of agents mode
//!
//! Every non-leader rank runs a node service that:
//! - Connects to the leader's registration endpoint, retrying with backoff
//!   while the leader is still starting
//! - Registers its rank and node id
//! - Answers LOOKUP requests for its own rank until SHUTDOWN

use crate::agent::ParticipantAgent;
use crate::distributed::protocol::*;
use crate::util::abort::AbortSignal;
use crate::util::backoff::Backoff;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// How a serve loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeEnd {
    /// The leader sent SHUTDOWN
    Shutdown,
    /// The leader closed the connection
    Disconnected,
}

/// Host name, for diagnostics only
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Connect to the leader, retrying until `timeout` elapses
pub async fn connect_with_backoff(addr: &str, timeout: Duration, abort: &AbortSignal) -> Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut backoff = Backoff::default();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let attempt = tokio::select! {
            biased;
            _ = abort.triggered() => anyhow::bail!("Aborted while connecting to leader at {}", addr),
            attempt = tokio::time::timeout_at(deadline, TcpStream::connect(addr)) => attempt,
        };
        let err = match attempt {
            Ok(Ok(stream)) => {
                tracing::debug!(addr, attempts, "connected to leader");
                return Ok(stream);
            }
            Ok(Err(e)) => e,
            Err(_) => anyhow::bail!(
                "Failed to connect to leader at {} within {:?} ({} attempts)",
                addr,
                timeout,
                attempts
            ),
        };

        let delay = backoff.next_delay();
        if Instant::now() + delay >= deadline {
            return Err(err).with_context(|| {
                format!("Failed to connect to leader at {} after {} attempts", addr, attempts)
            });
        }
        tracing::trace!(addr, attempts, ?delay, "leader not reachable yet: {}", err);

        tokio::select! {
            biased;
            _ = abort.triggered() => anyhow::bail!("Aborted while connecting to leader at {}", addr),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Send REGISTER and wait for the leader's acknowledgement
pub async fn register<S>(stream: &mut S, agent: &ParticipantAgent) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let identity = agent.identity();
    let reg = RegisterMessage {
        protocol_version: PROTOCOL_VERSION,
        rank: identity.rank,
        group_size: identity.size,
        node_id: agent.node_id(),
        hostname: local_hostname(),
    };
    write_message(stream, &Message::Register(reg)).await?;

    match read_message(stream).await? {
        Message::RegisterAck(ack) if ack.rank == identity.rank => {
            if ack.protocol_version != PROTOCOL_VERSION {
                anyhow::bail!(
                    "Protocol version mismatch: leader={}, agent={}",
                    ack.protocol_version,
                    PROTOCOL_VERSION
                );
            }
            Ok(())
        }
        Message::Error(e) => anyhow::bail!("Leader rejected registration: {}", e.error),
        other => anyhow::bail!("Expected REGISTER_ACK, got {:?}", other),
    }
}

/// Answer lookups for this agent's rank until the leader is done
pub async fn serve<S>(stream: &mut S, agent: &ParticipantAgent) -> Result<ServeEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let rank = agent.rank();

    loop {
        let msg = match try_read_message(stream).await? {
            Some(msg) => msg,
            None => return Ok(ServeEnd::Disconnected),
        };

        let reply = match msg {
            Message::Shutdown => return Ok(ServeEnd::Shutdown),
            Message::Lookup(req) if req.rank == rank => match agent.resolve_self() {
                Ok(placement) => {
                    tracing::debug!(rank, coordinate = %placement.coordinate, "answering lookup");
                    Message::Placement(PlacementMessage {
                        rank,
                        node_id: placement.node_id,
                        coordinate: placement.coordinate,
                    })
                }
                Err(err) => {
                    tracing::warn!(rank, "own placement unavailable: {}", err);
                    Message::LookupFailed(LookupFailedMessage::from_error(rank, agent.node_id(), &err))
                }
            },
            Message::Lookup(req) => Message::Error(ErrorMessage {
                rank: Some(req.rank),
                error: format!("agent for rank {} cannot answer for rank {}", rank, req.rank),
            }),
            other => Message::Error(ErrorMessage {
                rank: Some(rank),
                error: format!("unexpected message: {:?}", other),
            }),
        };

        write_message(stream, &reply).await?;
    }
}

/// Serve until the leader is done, bounded by `timeout` and `abort`
pub async fn serve_until_done<S>(
    stream: &mut S,
    agent: &ParticipantAgent,
    timeout: Duration,
    abort: &AbortSignal,
) -> Result<ServeEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = abort.triggered() => anyhow::bail!("Aborted while serving lookups"),
        served = tokio::time::timeout(timeout, serve(stream, agent)) => {
            served.map_err(|_| anyhow::anyhow!("Leader did not finish within {:?}", timeout))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupError;
    use crate::pmi::{JobIdentity, NodeId};
    use crate::topology::map::MeshMap;
    use crate::topology::Coordinate;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn agent(rank: usize, node: u32) -> ParticipantAgent {
        let map: MeshMap = [(NodeId(11), Coordinate::new(1, 0, 0))].into_iter().collect();
        ParticipantAgent::new(JobIdentity::new(rank, 2).unwrap(), NodeId(node), Arc::new(map))
    }

    #[tokio::test]
    async fn test_serve_answers_and_stops() {
        let (mut leader, mut worker) = tokio::io::duplex(4096);
        let agent = agent(1, 11);

        let served = tokio::spawn(async move { serve(&mut worker, &agent).await });

        write_message(&mut leader, &Message::Lookup(LookupMessage { rank: 1 })).await.unwrap();
        assert_eq!(
            read_message(&mut leader).await.unwrap(),
            Message::Placement(PlacementMessage {
                rank: 1,
                node_id: NodeId(11),
                coordinate: Coordinate::new(1, 0, 0),
            })
        );

        write_message(&mut leader, &Message::Lookup(LookupMessage { rank: 0 })).await.unwrap();
        assert!(matches!(read_message(&mut leader).await.unwrap(), Message::Error(_)));

        write_message(&mut leader, &Message::Shutdown).await.unwrap();
        assert_eq!(served.await.unwrap().unwrap(), ServeEnd::Shutdown);
    }

    #[tokio::test]
    async fn test_serve_reports_unavailable_node() {
        let (mut leader, mut worker) = tokio::io::duplex(4096);
        let agent = agent(1, 99);

        let served = tokio::spawn(async move { serve(&mut worker, &agent).await });

        write_message(&mut leader, &Message::Lookup(LookupMessage { rank: 1 })).await.unwrap();
        match read_message(&mut leader).await.unwrap() {
            Message::LookupFailed(f) => {
                assert_eq!(f.into_error(), LookupError::TopologyUnavailable(NodeId(99)));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        drop(leader);
        assert_eq!(served.await.unwrap().unwrap(), ServeEnd::Disconnected);
    }

    #[tokio::test]
    async fn test_register_rejected() {
        let (mut leader, mut worker) = tokio::io::duplex(4096);
        let agent = agent(1, 11);

        let leader_side = tokio::spawn(async move {
            let msg = read_message(&mut leader).await.unwrap();
            assert!(matches!(msg, Message::Register(ref r) if r.rank == 1 && r.group_size == 2));
            let reply = ErrorMessage {
                rank: Some(1),
                error: "rank 1 registered twice (node 11 then node 11)".to_string(),
            };
            write_message(&mut leader, &Message::Error(reply)).await.unwrap();
        });

        let err = register(&mut worker, &agent).await.unwrap_err();
        assert!(err.to_string().contains("registered twice"));
        leader_side.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_retries_until_leader_listens() {
        // Reserve a port, release it, then bind it again after a delay
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let addr = format!("127.0.0.1:{}", port);

        let bind_addr = addr.clone();
        let late_leader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let listener = TcpListener::bind(&bind_addr).await.unwrap();
            let _ = listener.accept().await.unwrap();
        });

        connect_with_backoff(&addr, Duration::from_secs(10), &AbortSignal::never())
            .await
            .unwrap();
        late_leader.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let addr = format!("127.0.0.1:{}", port);

        let err = connect_with_backoff(&addr, Duration::from_millis(100), &AbortSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to connect to leader"));
    }

    #[tokio::test]
    async fn test_connect_attempt_bounded_by_deadline() {
        // Non-routable address: the SYN goes unanswered
        let started = std::time::Instant::now();
        let err = connect_with_backoff("10.255.255.1:7710", Duration::from_millis(300), &AbortSignal::never())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to connect to leader"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_attempt_aborted() {
        let (trigger, signal) = crate::util::abort::abort_pair();
        let started = std::time::Instant::now();

        let connecting = tokio::spawn(async move {
            connect_with_backoff("10.255.255.1:7710", Duration::from_secs(60), &signal).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();

        let err = connecting.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("Aborted"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_serve_until_done_times_out() {
        let (_leader, mut worker) = tokio::io::duplex(4096);
        let agent = agent(1, 11);

        let err = serve_until_done(&mut worker, &agent, Duration::from_millis(50), &AbortSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }
}
