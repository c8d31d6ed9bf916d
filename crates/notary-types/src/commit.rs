//! Commit requests and outcomes exchanged with the uniqueness provider.
//!
//! A [`CommitRequest`] is built fresh for every notarisation attempt and is
//! never mutated afterwards. A client retry resends an identical request,
//! which the provider treats as an idempotent success.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{NotaryError, Party, Result, StateRef, TimeWindow, TransactionId};

/// Request to atomically consume `inputs` on behalf of `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCommitRequest")]
pub struct CommitRequest {
    caller: Party,
    tx_id: TransactionId,
    inputs: Vec<StateRef>,
    time_window: Option<TimeWindow>,
}

#[derive(Deserialize)]
struct RawCommitRequest {
    caller: Party,
    tx_id: TransactionId,
    inputs: Vec<StateRef>,
    time_window: Option<TimeWindow>,
}

impl TryFrom<RawCommitRequest> for CommitRequest {
    type Error = NotaryError;

    fn try_from(raw: RawCommitRequest) -> Result<Self> {
        Self::new(raw.caller, raw.tx_id, raw.inputs, raw.time_window)
    }
}

impl CommitRequest {
    /// Build a request, preserving input order.
    ///
    /// # Errors
    /// Returns [`NotaryError::DuplicateInput`] if an input appears twice.
    pub fn new(
        caller: Party,
        tx_id: TransactionId,
        inputs: impl IntoIterator<Item = StateRef>,
        time_window: Option<TimeWindow>,
    ) -> Result<Self> {
        let inputs: Vec<StateRef> = inputs.into_iter().collect();
        let mut seen = HashSet::with_capacity(inputs.len());
        for input in &inputs {
            if !seen.insert(*input) {
                return Err(NotaryError::DuplicateInput(*input));
            }
        }
        Ok(Self {
            caller,
            tx_id,
            inputs,
            time_window,
        })
    }

    #[must_use]
    pub fn caller(&self) -> &Party {
        &self.caller
    }

    #[must_use]
    pub fn tx_id(&self) -> TransactionId {
        self.tx_id
    }

    #[must_use]
    pub fn inputs(&self) -> &[StateRef] {
        &self.inputs
    }

    #[must_use]
    pub fn time_window(&self) -> Option<TimeWindow> {
        self.time_window
    }
}

/// Who consumed a state, and where in their transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumingTx {
    /// Transaction that consumed the state.
    pub tx_id: TransactionId,
    /// Position of the state among that transaction's inputs.
    pub input_index: u32,
    /// Party that requested the consuming commit.
    pub requesting_party: Party,
}

/// Inputs of `tx_id` that some other transaction already consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The transaction whose commit was refused.
    pub tx_id: TransactionId,
    /// Every contested input and its actual consumer.
    pub state_history: BTreeMap<StateRef, ConsumingTx>,
}

impl Conflict {
    /// The consumer recorded against `state`, if it is contested.
    #[must_use]
    pub fn consumer_of(&self, state: &StateRef) -> Option<&ConsumingTx> {
        self.state_history.get(state)
    }
}

/// Result of a commit attempt that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// All inputs are now recorded against the transaction (or already were).
    Committed,
    /// At least one input belongs to a different transaction; nothing recorded.
    Conflict(Conflict),
}

impl CommitOutcome {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Convert a conflict into [`NotaryError::Conflict`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Committed => Ok(()),
            Self::Conflict(conflict) => Err(NotaryError::Conflict(conflict)),
        }
    }
}
