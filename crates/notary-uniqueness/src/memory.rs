//! Single-node provider for non-clustered deployments.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use notary_types::{Clock, CommitOutcome, CommitRequest, Party, Result, StateRef, SystemClock, TransactionId};

use crate::{
    provider::UniquenessProvider,
    record::{ConsumptionEntry, ConsumptionRecord},
};

/// Keeps the consumption record in process memory behind a mutex.
pub struct InMemoryUniquenessProvider {
    record: Mutex<ConsumptionRecord>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryUniquenessProvider {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryUniquenessProvider {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            record: Mutex::new(ConsumptionRecord::new()),
            clock,
        }
    }

    pub fn consumer_of(&self, state: &StateRef) -> Option<ConsumptionEntry> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(state)
            .cloned()
    }

    pub fn snapshot(&self) -> ConsumptionRecord {
        self.record.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl UniquenessProvider for InMemoryUniquenessProvider {
    async fn commit(&self, inputs: &[StateRef], tx_id: TransactionId, caller: &Party) -> Result<CommitOutcome> {
        if inputs.is_empty() {
            return Ok(CommitOutcome::Committed);
        }
        let request = CommitRequest::new(caller.clone(), tx_id, inputs.iter().copied(), None)?;
        let now = self.clock.now();
        let outcome = self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_request(&request, now);

        match &outcome {
            CommitOutcome::Committed => {
                tracing::debug!(tx_id = %tx_id, inputs = inputs.len(), "Inputs committed");
            }
            CommitOutcome::Conflict(conflict) => {
                tracing::warn!(tx_id = %tx_id, conflicting = conflict.state_history.len(), "Commit conflict");
            }
        }
        Ok(outcome)
    }
}
