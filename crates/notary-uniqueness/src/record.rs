//! The consumption record: which transaction consumed which state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use notary_types::{CommitOutcome, CommitRequest, Conflict, ConsumingTx, Party, StateRef, TransactionId};
use serde::{Deserialize, Serialize};

/// One recorded consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionEntry {
    pub consuming: ConsumingTx,
    pub committed_at: DateTime<Utc>,
}

/// Append-only map from state to its consumer.
///
/// A state, once recorded, is never overwritten or removed, so at most one
/// transaction id is ever recorded against it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    consumed: BTreeMap<StateRef, ConsumptionEntry>,
}

impl ConsumptionRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, state: &StateRef) -> Option<&ConsumptionEntry> {
        self.consumed.get(state)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateRef, &ConsumptionEntry)> {
        self.consumed.iter()
    }

    /// Inputs already consumed by a transaction other than `tx_id`.
    #[must_use]
    pub fn conflicts(&self, inputs: &[StateRef], tx_id: TransactionId) -> BTreeMap<StateRef, ConsumingTx> {
        inputs
            .iter()
            .filter_map(|input| {
                self.consumed
                    .get(input)
                    .filter(|entry| entry.consuming.tx_id != tx_id)
                    .map(|entry| (*input, entry.consuming.clone()))
            })
            .collect()
    }

    /// Check-and-record, all or nothing.
    ///
    /// Inputs already recorded against `tx_id` itself are left untouched, so
    /// a repeated commit of the same transaction succeeds.
    pub fn apply(
        &mut self,
        inputs: &[StateRef],
        tx_id: TransactionId,
        caller: &Party,
        committed_at: DateTime<Utc>,
    ) -> CommitOutcome {
        let state_history = self.conflicts(inputs, tx_id);
        if !state_history.is_empty() {
            return CommitOutcome::Conflict(Conflict { tx_id, state_history });
        }

        for (position, input) in inputs.iter().enumerate() {
            self.consumed.entry(*input).or_insert_with(|| ConsumptionEntry {
                consuming: ConsumingTx {
                    tx_id,
                    input_index: u32::try_from(position).unwrap_or(u32::MAX),
                    requesting_party: caller.clone(),
                },
                committed_at,
            });
        }
        CommitOutcome::Committed
    }

    pub fn apply_request(&mut self, request: &CommitRequest, committed_at: DateTime<Utc>) -> CommitOutcome {
        self.apply(request.inputs(), request.tx_id(), request.caller(), committed_at)
    }
}

#[cfg(test)]
mod tests {
    use notary_types::KeyPair;

    use super::*;

    fn state(tx: u8, index: u32) -> StateRef {
        StateRef::new(TransactionId::from_bytes([tx; 32]), index)
    }

    fn tx(n: u8) -> TransactionId {
        TransactionId::from_bytes([0xA0 + n; 32])
    }

    fn alice() -> Party {
        Party::new("Alice", KeyPair::from_seed([1; 32]).public_key())
    }

    #[test]
    fn records_every_input_with_position() {
        let mut record = ConsumptionRecord::new();
        let outcome = record.apply(&[state(1, 0), state(1, 1)], tx(1), &alice(), Utc::now());
        assert!(outcome.is_committed());
        assert_eq!(record.len(), 2);
        let entry = record.get(&state(1, 1)).unwrap();
        assert_eq!(entry.consuming.tx_id, tx(1));
        assert_eq!(entry.consuming.input_index, 1);
        assert_eq!(entry.consuming.requesting_party, alice());
    }

    #[test]
    fn conflict_records_nothing() {
        let mut record = ConsumptionRecord::new();
        record.apply(&[state(1, 0)], tx(1), &alice(), Utc::now());

        let outcome = record.apply(&[state(1, 1), state(1, 0)], tx(2), &alice(), Utc::now());
        let CommitOutcome::Conflict(conflict) = outcome else {
            panic!("expected conflict");
        };
        assert_eq!(conflict.tx_id, tx(2));
        assert_eq!(conflict.state_history.len(), 1);
        assert_eq!(conflict.consumer_of(&state(1, 0)).map(|c| c.tx_id), Some(tx(1)));
        assert!(record.get(&state(1, 1)).is_none());
    }

    #[test]
    fn repeat_commit_keeps_original_entry() {
        let mut record = ConsumptionRecord::new();
        let first = Utc::now();
        record.apply(&[state(1, 0)], tx(1), &alice(), first);
        let outcome = record.apply(&[state(1, 0)], tx(1), &alice(), first + chrono::Duration::seconds(9));
        assert!(outcome.is_committed());
        assert_eq!(record.get(&state(1, 0)).unwrap().committed_at, first);
    }

    #[test]
    fn empty_inputs_commit() {
        let mut record = ConsumptionRecord::new();
        assert!(record.apply(&[], tx(1), &alice(), Utc::now()).is_committed());
        assert!(record.is_empty());
    }
}
