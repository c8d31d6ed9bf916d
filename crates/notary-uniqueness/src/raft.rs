//! Uniqueness replicated through the consensus log.
//!
//! Every member runs a [`ConsumptionStateMachine`] fed by the Raft node, so
//! all members converge on the same [`ConsumptionRecord`]. A commit proposes
//! its [`CommitRequest`] to the local member; the result is the outcome the
//! state machine produced when the entry was applied.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use notary_raft::{EntryMeta, Inbox, LogStorage, RaftHandle, RaftNode, RaftTransport, StateMachine};
use notary_types::{
    Clock, CommitOutcome, CommitRequest, NodeId, Party, RaftConfig, Result, StateRef, TransactionId,
};

use crate::{
    provider::UniquenessProvider,
    record::{ConsumptionEntry, ConsumptionRecord},
};

/// Handle to the Raft member driving uniqueness.
pub type CommitLog = RaftHandle<CommitRequest, CommitOutcome>;

/// Applies committed requests to a shared record.
///
/// The commit timestamp is the leader's clock at append time, carried in the
/// entry, so every member records the same instant.
#[derive(Clone, Default)]
pub struct ConsumptionStateMachine {
    record: Arc<RwLock<ConsumptionRecord>>,
}

impl ConsumptionStateMachine {
    #[must_use]
    pub fn new(record: Arc<RwLock<ConsumptionRecord>>) -> Self {
        Self { record }
    }
}

impl StateMachine<CommitRequest> for ConsumptionStateMachine {
    type Output = CommitOutcome;

    fn apply(&mut self, meta: EntryMeta, request: &CommitRequest) -> CommitOutcome {
        let outcome = self
            .record
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_request(request, meta.proposed_at);

        match &outcome {
            CommitOutcome::Committed => tracing::debug!(
                index = meta.index,
                term = meta.term,
                tx_id = %request.tx_id(),
                inputs = request.inputs().len(),
                "Applied commit"
            ),
            CommitOutcome::Conflict(conflict) => tracing::debug!(
                index = meta.index,
                term = meta.term,
                tx_id = %request.tx_id(),
                conflicting = conflict.state_history.len(),
                "Applied conflicting commit"
            ),
        }
        outcome
    }
}

/// Raft-backed [`UniquenessProvider`] for one cluster member.
pub struct RaftUniquenessProvider {
    log: CommitLog,
    record: Arc<RwLock<ConsumptionRecord>>,
}

impl RaftUniquenessProvider {
    /// Start this member's Raft node with a fresh state machine.
    ///
    /// If `storage` holds a previous log, the record is rebuilt as the
    /// committed prefix is re-applied. Commit times come from `clock` on
    /// whichever member leads when a request is appended.
    pub fn start<S: LogStorage<CommitRequest>>(
        id: NodeId,
        members: &[NodeId],
        config: RaftConfig,
        storage: S,
        transport: Arc<dyn RaftTransport<CommitRequest>>,
        inbox: Inbox<CommitRequest>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let record = Arc::new(RwLock::new(ConsumptionRecord::new()));
        let state_machine = ConsumptionStateMachine::new(Arc::clone(&record));
        let log = RaftNode::spawn_with_clock(
            id,
            members,
            config,
            storage,
            state_machine,
            transport,
            inbox,
            clock,
        );
        Self { log, record }
    }

    /// The underlying Raft member.
    pub fn log(&self) -> &CommitLog {
        &self.log
    }

    /// Consumer of `state` as applied on this member.
    pub fn consumer_of(&self, state: &StateRef) -> Option<ConsumptionEntry> {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(state)
            .cloned()
    }

    pub fn snapshot(&self) -> ConsumptionRecord {
        self.record.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl UniquenessProvider for RaftUniquenessProvider {
    async fn commit(&self, inputs: &[StateRef], tx_id: TransactionId, caller: &Party) -> Result<CommitOutcome> {
        let request = CommitRequest::new(caller.clone(), tx_id, inputs.iter().copied(), None)?;
        self.commit_request(&request).await
    }

    async fn commit_request(&self, request: &CommitRequest) -> Result<CommitOutcome> {
        if request.inputs().is_empty() {
            return Ok(CommitOutcome::Committed);
        }
        let outcome = self.log.propose(request.clone()).await?;
        match &outcome {
            CommitOutcome::Committed => tracing::info!(
                node = %self.log.id(),
                tx_id = %request.tx_id(),
                inputs = request.inputs().len(),
                "Commit replicated"
            ),
            CommitOutcome::Conflict(conflict) => tracing::warn!(
                node = %self.log.id(),
                tx_id = %request.tx_id(),
                conflicting = conflict.state_history.len(),
                "Commit rejected: inputs already consumed"
            ),
        }
        Ok(outcome)
    }
}
