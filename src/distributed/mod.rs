//! Agents mode
//!
//! In agents mode every rank runs its own participant agent and the leader
//! queries them over TCP instead of resolving node ids itself.
//!
//! - **Leader** (`coordinator`): binds the registration endpoint, keeps one
//!   connection per registered rank, sends lookups over it
//! - **Worker** (`node_service`): registers with the leader and answers lookups
//!   for its own rank until told to shut down
//!
//! # Modules
//!
//! - `protocol`: Message definitions and framing
//! - `coordinator`: Leader side
//! - `node_service`: Worker side

pub mod coordinator;
pub mod node_service;
pub mod protocol;

pub use coordinator::{bind_endpoint, gather_agents, AgentPool};
pub use node_service::{connect_with_backoff, register, serve_until_done, ServeEnd};
pub use protocol::{Message, PROTOCOL_VERSION};
