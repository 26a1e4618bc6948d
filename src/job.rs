//! Job lifecycle
//!
//! One process per job member runs [`run_job`]:
//!
//! ```text
//! Uninitialized -> Registered -> Collecting -> Reported -> Terminated
//! ```
//!
//! Non-leaders skip collection (`Registered -> Terminated`) and any state may
//! fall straight to `Terminated` on a fatal error. The process manager is
//! finalized exactly once through [`JobContext`], which is acquired before
//! `init()` so a failed init is still torn down.

use crate::agent::ParticipantAgent;
use crate::collector::{Collection, Collector, LocalLookup};
use crate::config::{CollectionMode, Config};
use crate::directory::Directory;
use crate::distributed::{bind_endpoint, connect_with_backoff, gather_agents, register, serve_until_done};
use crate::error::InitError;
use crate::output;
use crate::pmi::{JobIdentity, NodeId, ProcessManager, Rank};
use crate::topology::{build_resolver, TopologyResolver};
use crate::util::abort::AbortSignal;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;

/// Process-level job state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Uninitialized,
    Registered,
    Collecting,
    Reported,
    Terminated,
}

impl JobState {
    /// Whether `self -> next` is a legal edge
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Uninitialized, Registered) | (Registered, Collecting) | (Collecting, Reported) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal job state transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// Scoped ownership of the process manager
///
/// Dropping the context finalizes the process manager if [`teardown`] has not
/// already done so.
///
/// [`teardown`]: JobContext::teardown
pub struct JobContext {
    pm: Box<dyn ProcessManager>,
    state: JobState,
    identity: Option<JobIdentity>,
    finalized: bool,
}

impl JobContext {
    pub fn acquire(pm: Box<dyn ProcessManager>) -> Self {
        Self {
            pm,
            state: JobState::Uninitialized,
            identity: None,
            finalized: false,
        }
    }

    /// Initialize the process manager
    pub fn init(&mut self) -> std::result::Result<JobIdentity, InitError> {
        if self.identity.is_some() {
            return Err(InitError::AlreadyInitialized);
        }
        let identity = self.pm.init()?;
        self.identity = Some(identity);
        Ok(identity)
    }

    pub fn identity(&self) -> Option<JobIdentity> {
        self.identity
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn resolve_node_id(&self, rank: Rank) -> std::result::Result<NodeId, InitError> {
        self.pm.resolve_node_id(rank)
    }

    pub fn advance(&mut self, next: JobState) -> std::result::Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(from = ?self.state, to = ?next, "job state");
        self.state = next;
        Ok(())
    }

    /// Finalize the process manager; later calls are no-ops
    pub fn teardown(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.state = JobState::Terminated;
        self.pm.finalize();
    }
}

impl Drop for JobContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("state", &self.state)
            .field("identity", &self.identity)
            .field("finalized", &self.finalized)
            .finish()
    }
}

/// What this process does in the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRole {
    Leader,
    Worker,
}

impl JobRole {
    pub fn assign(identity: JobIdentity, leader_rank: Rank) -> std::result::Result<Self, InitError> {
        if leader_rank >= identity.size {
            return Err(InitError::Config(format!(
                "leader rank {} is outside the job group of size {}",
                leader_rank, identity.size
            )));
        }
        Ok(if identity.rank == leader_rank {
            JobRole::Leader
        } else {
            JobRole::Worker
        })
    }

    pub fn task(self, config: &Config, abort: AbortSignal) -> Box<dyn RoleTask> {
        match self {
            JobRole::Leader => Box::new(LeaderTask {
                config: config.clone(),
                abort,
            }),
            JobRole::Worker => Box::new(WorkerTask {
                config: config.clone(),
                abort,
            }),
        }
    }
}

/// Result of a role's work
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Leader finished collecting; the report still has to be emitted
    Reported(Collection),
    /// Worker finished serving (or had nothing to serve)
    WorkerDone,
}

impl JobOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            JobOutcome::Reported(collection) => collection.outcome.exit_code(),
            JobOutcome::WorkerDone => 0,
        }
    }
}

/// Role-specific part of a job
#[async_trait]
pub trait RoleTask: Send {
    async fn run(self: Box<Self>, ctx: &mut JobContext) -> Result<JobOutcome>;
}

fn topology(config: &Config) -> Result<Arc<dyn TopologyResolver>> {
    let source = config
        .topology
        .as_ref()
        .ok_or_else(|| InitError::Config("no topology source configured".to_string()))?;
    build_resolver(source)
}

fn require_identity(ctx: &JobContext) -> Result<JobIdentity> {
    Ok(ctx.identity().ok_or(InitError::NotInitialized)?)
}

/// Runs the collector and produces the report
pub struct LeaderTask {
    config: Config,
    abort: AbortSignal,
}

#[async_trait]
impl RoleTask for LeaderTask {
    async fn run(self: Box<Self>, ctx: &mut JobContext) -> Result<JobOutcome> {
        let identity = require_identity(ctx)?;
        let topology = topology(&self.config)?;
        let directory = Directory::new(identity.size);

        let collection = match self.config.job.mode {
            CollectionMode::Local => {
                for rank in 0..identity.size {
                    directory.register(rank, ctx.resolve_node_id(rank)?)?;
                }
                ctx.advance(JobState::Registered)?;
                ctx.advance(JobState::Collecting)?;

                let lookup = Arc::new(LocalLookup::new(topology));
                Collector::from_config(lookup, &self.config.collector)
                    .collect(&directory, &self.abort)
                    .await
            }
            CollectionMode::Agents => {
                let listener = bind_endpoint(&self.config.job.leader_addr).await?;
                let node = ctx.resolve_node_id(identity.rank)?;
                let agent = Arc::new(ParticipantAgent::new(identity, node, topology));

                let pool = gather_agents(
                    listener,
                    &directory,
                    agent,
                    self.config.collector.registration_timeout(),
                    &self.abort,
                )
                .await?;
                ctx.advance(JobState::Registered)?;
                ctx.advance(JobState::Collecting)?;

                let pool = Arc::new(pool);
                let collection = Collector::from_config(Arc::clone(&pool), &self.config.collector)
                    .collect(&directory, &self.abort)
                    .await;
                pool.shutdown().await;
                collection
            }
        };

        Ok(JobOutcome::Reported(collection))
    }
}

/// Registers with the leader and answers its lookups
pub struct WorkerTask {
    config: Config,
    abort: AbortSignal,
}

#[async_trait]
impl RoleTask for WorkerTask {
    async fn run(self: Box<Self>, ctx: &mut JobContext) -> Result<JobOutcome> {
        let identity = require_identity(ctx)?;

        if self.config.job.mode == CollectionMode::Local {
            // The leader resolves every rank itself
            ctx.advance(JobState::Registered)?;
            return Ok(JobOutcome::WorkerDone);
        }

        let node = ctx.resolve_node_id(identity.rank)?;
        let agent = ParticipantAgent::new(identity, node, topology(&self.config)?);
        let leader = &self.config.job.leader_addr;

        let mut stream = connect_with_backoff(leader, self.config.agent.connect_timeout(), &self.abort).await?;
        register(&mut stream, &agent).await?;
        ctx.advance(JobState::Registered)?;
        tracing::debug!(rank = identity.rank, node = %node, leader = %leader, "registered with leader");

        let end = serve_until_done(&mut stream, &agent, self.config.agent.serve_timeout(), &self.abort).await?;
        tracing::debug!(rank = identity.rank, ?end, "agent finished");
        Ok(JobOutcome::WorkerDone)
    }
}

/// Fatal job error with rank context
#[derive(Debug)]
pub struct JobFailure {
    pub rank: Option<Rank>,
    pub error: anyhow::Error,
}

impl JobFailure {
    pub fn new(rank: Option<Rank>, error: impl Into<anyhow::Error>) -> Self {
        Self {
            rank,
            error: error.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            Some(rank) => write!(f, "=== ERROR [rank:{}] {:#}", rank, self.error),
            None => write!(f, "=== ERROR [rank:?] {:#}", self.error),
        }
    }
}

/// Run one job member to completion
///
/// Returns the process exit code, or the fatal error to print. The process
/// manager is finalized exactly once on every path.
pub async fn run_job(
    pm: Box<dyn ProcessManager>,
    config: &Config,
    abort: AbortSignal,
    sink: &mut (dyn Write + Send),
) -> std::result::Result<i32, JobFailure> {
    let mut ctx = JobContext::acquire(pm);

    let identity = ctx.init().map_err(|e| JobFailure::new(None, e))?;
    let rank = Some(identity.rank);
    let fail = |e: anyhow::Error| JobFailure::new(rank, e);

    let role = JobRole::assign(identity, config.job.leader_rank).map_err(|e| fail(e.into()))?;
    tracing::debug!(rank = identity.rank, size = identity.size, ?role, mode = ?config.job.mode, "job started");

    let outcome = role.task(config, abort).run(&mut ctx).await.map_err(fail)?;

    if let JobOutcome::Reported(collection) = &outcome {
        let rendered = output::render(&collection.outcome, &collection.stats, &config.output).map_err(fail)?;
        output::write_output(&rendered, &config.output, sink).map_err(fail)?;
        ctx.advance(JobState::Reported).map_err(|e| fail(e.into()))?;

        if config.output.summary {
            let summary = collection.stats.summary();
            tracing::info!(
                status = collection.outcome.status_str(),
                "{}",
                output::text::format_summary(&summary)
            );
        }
    }

    ctx.teardown();
    Ok(outcome.exit_code())
}
