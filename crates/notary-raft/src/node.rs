//! Tokio driver around [`RaftCore`].
//!
//! One task per member owns the core, the state machine and the timers.
//! Everything else talks to it through a cloneable [`RaftHandle`]: proposals
//! travel over a channel and their results come back on a oneshot once the
//! entry is committed and applied locally.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use notary_types::{Clock, NodeId, NotaryError, RaftConfig, Result, SystemClock};
use rand::Rng;
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, MissedTickBehavior},
};

use crate::{
    log::{Command, EntryMeta, EntryPayload, LogIndex, Term},
    raft::{RaftCore, Ready, Role},
    rpc::RaftMessage,
    storage::LogStorage,
    transport::{Inbox, RaftTransport},
};

/// Deterministic state machine fed with committed commands.
///
/// Every member applies the same commands in the same order with the same
/// [`EntryMeta`], so `apply` must depend on nothing else.
pub trait StateMachine<C>: Send + 'static {
    type Output: Clone + Send + 'static;

    fn apply(&mut self, meta: EntryMeta, command: &C) -> Self::Output;
}

/// Snapshot of a member's view of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaftStatus {
    pub id: NodeId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub last_log_index: LogIndex,
}

impl RaftStatus {
    fn of<C: Command, S: LogStorage<C>>(core: &RaftCore<C, S>) -> Self {
        Self {
            id: core.id(),
            role: core.role(),
            term: core.term(),
            leader: core.leader_id(),
            commit_index: core.commit_index(),
            last_applied: core.last_applied(),
            last_log_index: core.last_index(),
        }
    }
}

enum Request<C, O> {
    Propose {
        command: C,
        reply: oneshot::Sender<Result<O>>,
    },
    Shutdown,
}

enum Event<C, O> {
    ElectionTimeout,
    Heartbeat,
    Message(NodeId, RaftMessage<C>),
    Request(Request<C, O>),
    Stop,
}

type Waiter<O> = (Term, oneshot::Sender<Result<O>>);

// ---------------------------------------------------------------------------
// RaftHandle
// ---------------------------------------------------------------------------

/// Client side of a running [`RaftNode`].
pub struct RaftHandle<C, O> {
    id: NodeId,
    requests: mpsc::UnboundedSender<Request<C, O>>,
    status: watch::Receiver<RaftStatus>,
}

impl<C, O> Clone for RaftHandle<C, O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            requests: self.requests.clone(),
            status: self.status.clone(),
        }
    }
}

impl<C: Command, O: Clone + Send + 'static> RaftHandle<C, O> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Replicate `command` and wait for its result from the local state
    /// machine.
    ///
    /// Fails with `NotLeader`/`NoLeader` if this member does not lead, and
    /// with `ProposalDropped` if the entry was overwritten by a new leader.
    /// Both are retryable.
    pub async fn propose(&self, command: C) -> Result<O> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Propose { command, reply })
            .map_err(|_| NotaryError::ConsensusShutdown)?;
        rx.await.map_err(|_| NotaryError::ConsensusShutdown)?
    }

    pub fn status(&self) -> RaftStatus {
        self.status.borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.status.borrow().role == Role::Leader
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<RaftStatus> {
        self.status.clone()
    }

    /// Wait until this member knows a leader.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId> {
        let mut status = self.status.clone();
        let wait = async move {
            loop {
                if let Some(leader) = status.borrow_and_update().leader {
                    return Ok(leader);
                }
                if status.changed().await.is_err() {
                    return Err(NotaryError::ConsensusShutdown);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| NotaryError::NoLeader)?
    }

    /// Stop the member. Pending proposals fail with `ConsensusShutdown`.
    pub fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
    }
}

// ---------------------------------------------------------------------------
// RaftNode
// ---------------------------------------------------------------------------

/// A running cluster member.
pub struct RaftNode<C: Command, S, M: StateMachine<C>> {
    core: RaftCore<C, S>,
    state_machine: M,
    config: RaftConfig,
    transport: Arc<dyn RaftTransport<C>>,
    inbox: Inbox<C>,
    requests: mpsc::UnboundedReceiver<Request<C, M::Output>>,
    waiters: BTreeMap<LogIndex, Waiter<M::Output>>,
    status: watch::Sender<RaftStatus>,
    clock: Arc<dyn Clock>,
}

impl<C, S, M> RaftNode<C, S, M>
where
    C: Command,
    S: LogStorage<C>,
    M: StateMachine<C>,
{
    /// Start a member on the current tokio runtime, stamping entries with
    /// the system clock.
    ///
    /// `storage` may hold state from a previous run; committed entries are
    /// re-applied to `state_machine` as the commit index is re-learned.
    pub fn spawn(
        id: NodeId,
        members: &[NodeId],
        config: RaftConfig,
        storage: S,
        state_machine: M,
        transport: Arc<dyn RaftTransport<C>>,
        inbox: Inbox<C>,
    ) -> RaftHandle<C, M::Output> {
        Self::spawn_with_clock(
            id,
            members,
            config,
            storage,
            state_machine,
            transport,
            inbox,
            Arc::new(SystemClock),
        )
    }

    /// As [`RaftNode::spawn`], with `clock` supplying every entry's
    /// `proposed_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_with_clock(
        id: NodeId,
        members: &[NodeId],
        config: RaftConfig,
        storage: S,
        state_machine: M,
        transport: Arc<dyn RaftTransport<C>>,
        inbox: Inbox<C>,
        clock: Arc<dyn Clock>,
    ) -> RaftHandle<C, M::Output> {
        let core = RaftCore::new(id, members, storage, config.max_entries_per_append);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RaftStatus::of(&core));

        let node = Self {
            core,
            state_machine,
            config,
            transport,
            inbox,
            requests: requests_rx,
            waiters: BTreeMap::new(),
            status: status_tx,
            clock,
        };
        tokio::spawn(node.run());

        RaftHandle {
            id,
            requests: requests_tx,
            status: status_rx,
        }
    }

    fn election_timeout(&self) -> Duration {
        let min = self.config.election_timeout_min_ms;
        let max = self.config.election_timeout_max_ms.max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    async fn run(mut self) {
        tracing::info!(
            node = %self.core.id(),
            peers = self.core.peers().len(),
            term = self.core.term(),
            last_index = self.core.last_index(),
            "Raft node started"
        );

        let mut election_deadline = Instant::now() + self.election_timeout();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let was_leader = self.core.is_leader();
            let event = tokio::select! {
                () = tokio::time::sleep_until(election_deadline), if !was_leader => Event::ElectionTimeout,
                _ = heartbeat.tick(), if was_leader => Event::Heartbeat,
                message = self.inbox.recv() => match message {
                    Some((from, message)) => Event::Message(from, message),
                    None => Event::Stop,
                },
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown) | None => Event::Stop,
                    Some(request) => Event::Request(request),
                },
            };

            let step = match event {
                Event::ElectionTimeout => {
                    election_deadline = Instant::now() + self.election_timeout();
                    self.core.start_election(self.clock.now())
                }
                Event::Heartbeat => Ok(self.core.heartbeat()),
                Event::Message(from, message) => self.core.handle(from, message, self.clock.now()),
                Event::Request(Request::Propose { command, reply }) => {
                    self.on_propose(command, reply);
                    Ok(self.core.broadcast_append())
                }
                Event::Request(Request::Shutdown) | Event::Stop => break,
            };

            let ready = match step {
                Ok(ready) => ready,
                Err(err) => {
                    tracing::error!(node = %self.core.id(), error = %err, "Raft step failed, stopping member");
                    self.fail_waiters(|| err.clone());
                    break;
                }
            };

            self.dispatch(ready, &mut election_deadline);

            let is_leader = self.core.is_leader();
            if is_leader && !was_leader {
                heartbeat.reset();
            }
            if was_leader && !is_leader {
                election_deadline = Instant::now() + self.election_timeout();
                let err = self.core.not_leader_error();
                self.fail_waiters(|| err.clone());
            }

            self.apply_committed();
            self.publish_status();
        }

        self.fail_waiters(|| NotaryError::ConsensusShutdown);
        tracing::info!(node = %self.core.id(), term = self.core.term(), "Raft node stopped");
    }

    fn on_propose(&mut self, command: C, reply: oneshot::Sender<Result<M::Output>>) {
        match self.core.propose(command, self.clock.now()) {
            Ok((index, term)) => {
                tracing::debug!(node = %self.core.id(), index, term, "Proposal appended");
                self.waiters.insert(index, (term, reply));
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    fn dispatch(&self, ready: Ready<C>, election_deadline: &mut Instant) {
        if ready.reset_election_timer {
            *election_deadline = Instant::now() + self.election_timeout();
        }
        let from = self.core.id();
        for out in ready.messages {
            self.transport.send(from, out.to, out.message);
        }
    }

    fn apply_committed(&mut self) {
        for entry in self.core.take_committed() {
            let meta = entry.meta();
            let output = match &entry.payload {
                EntryPayload::Noop => None,
                EntryPayload::Command(command) => Some(self.state_machine.apply(meta, command)),
            };

            if let Some((term, reply)) = self.waiters.remove(&meta.index) {
                let result = match output {
                    Some(output) if term == meta.term => Ok(output),
                    _ => Err(NotaryError::ProposalDropped { index: meta.index }),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn fail_waiters(&mut self, err: impl Fn() -> NotaryError) {
        for (_, (_, reply)) in std::mem::take(&mut self.waiters) {
            let _ = reply.send(Err(err()));
        }
    }

    fn publish_status(&self) {
        let next = RaftStatus::of(&self.core);
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
