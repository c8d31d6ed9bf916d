use async_trait::async_trait;
use notary_types::{CommitOutcome, CommitRequest, Party, Result, StateRef, TransactionId};

/// Atomic check-and-record of consumed states.
///
/// Implementations guarantee:
/// - all inputs are recorded against `tx_id`, or none are;
/// - a commit whose inputs are all already recorded against `tx_id` succeeds;
/// - any input recorded against another transaction yields a
///   [`CommitOutcome::Conflict`] naming every such input and its consumer;
/// - an empty input set succeeds without touching any state.
///
/// `Err` is reserved for failures that did not reach a decision (no leader,
/// shutdown, malformed input). Those are safe to retry.
#[async_trait]
pub trait UniquenessProvider: Send + Sync {
    async fn commit(&self, inputs: &[StateRef], tx_id: TransactionId, caller: &Party) -> Result<CommitOutcome>;

    /// Commit a prepared request.
    async fn commit_request(&self, request: &CommitRequest) -> Result<CommitOutcome> {
        self.commit(request.inputs(), request.tx_id(), request.caller()).await
    }
}
