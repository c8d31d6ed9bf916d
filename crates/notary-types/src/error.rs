//! Error types for the notary cluster.
//!
//! All errors use the `NT_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Request errors (malformed input, bad signatures)
//! - 2xx: Time-window errors
//! - 3xx: Uniqueness errors
//! - 4xx: Consensus errors
//! - 5xx: Flow / session errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{Conflict, NodeId, StateRef, TransactionId};

/// Central error enum for all notary operations.
#[derive(Debug, Clone, Error)]
pub enum NotaryError {
    // =================================================================
    // Request Errors (1xx)
    // =================================================================
    /// The request could not be decoded or is structurally invalid.
    #[error("NT_ERR_100: Malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// A signature did not verify against the claimed key.
    #[error("NT_ERR_101: Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// Full transaction verification failed (validating notaries only).
    #[error("NT_ERR_102: Transaction invalid: {reason}")]
    TransactionInvalid { reason: String },

    /// The same input appears twice in one commit request.
    #[error("NT_ERR_103: Duplicate input state {0}")]
    DuplicateInput(StateRef),

    /// The declared transaction id does not match the transaction content.
    #[error("NT_ERR_104: Transaction id mismatch: declared {declared}, computed {computed}")]
    TransactionIdMismatch {
        declared: TransactionId,
        computed: TransactionId,
    },

    // =================================================================
    // Time-Window Errors (2xx)
    // =================================================================
    /// A time window was constructed with `from_time > until_time`.
    #[error("NT_ERR_200: Invalid time window: {reason}")]
    InvalidTimeWindow { reason: String },

    /// The transaction was submitted outside its window plus tolerance.
    #[error("NT_ERR_201: Time window of transaction {0} is not valid at this notary")]
    TimeWindowInvalid(TransactionId),

    // =================================================================
    // Uniqueness Errors (3xx)
    // =================================================================
    /// One or more inputs were already consumed by a different transaction.
    #[error("NT_ERR_300: Input states of {} already consumed ({} conflicting)", .0.tx_id, .0.state_history.len())]
    Conflict(Conflict),

    // =================================================================
    // Consensus Errors (4xx)
    // =================================================================
    /// No leader is currently known to this member.
    #[error("NT_ERR_400: No cluster leader is known")]
    NoLeader,

    /// This member is not the leader; `leader_hint` names the one it follows.
    #[error("NT_ERR_401: Not the cluster leader (leader hint: {})", display_hint(.leader_hint))]
    NotLeader { leader_hint: Option<NodeId> },

    /// A proposed entry was overwritten by a different leader before commit.
    #[error("NT_ERR_402: Proposal at log index {index} was dropped by a leadership change")]
    ProposalDropped { index: u64 },

    /// The durable log storage failed.
    #[error("NT_ERR_403: Log storage failure: {0}")]
    LogStorage(String),

    /// A log invariant was violated (e.g. overwriting a committed entry).
    #[error("NT_ERR_404: Log inconsistency: {reason}")]
    LogInconsistency { reason: String },

    /// The consensus driver has stopped.
    #[error("NT_ERR_405: Consensus node has shut down")]
    ConsensusShutdown,

    // =================================================================
    // Flow / Session Errors (5xx)
    // =================================================================
    /// A single attempt received no reply within the response budget.
    #[error("NT_ERR_500: No response from {member} within {timeout_ms}ms")]
    Timeout { member: NodeId, timeout_ms: u64 },

    /// Every attempt timed out or was redirected; the requester gave up.
    #[error("NT_ERR_501: Notarisation retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The session's channel closed before a reply arrived.
    #[error("NT_ERR_502: Session closed")]
    SessionClosed,

    /// A message arrived that the flow did not expect in its current state.
    #[error("NT_ERR_503: Unexpected message: {reason}")]
    UnexpectedMessage { reason: String },

    /// Sending or receiving over the network failed.
    #[error("NT_ERR_504: Transport error: {reason}")]
    Transport { reason: String },

    /// The addressed node is not a member of the cluster.
    #[error("NT_ERR_505: Unknown cluster member {0}")]
    UnknownMember(NodeId),

    /// The notary answered with a generic error.
    #[error("NT_ERR_506: Notary error: {message}")]
    RemoteError { message: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("NT_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("NT_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("NT_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("NT_ERR_903: I/O error: {0}")]
    Io(String),
}

fn display_hint(hint: &Option<NodeId>) -> String {
    hint.map_or_else(|| "none".to_string(), |id| id.to_string())
}

impl NotaryError {
    /// Transient cluster or network conditions that a client may retry
    /// against the same or another member. Conflicts and time-window
    /// rejections are permanent outcomes and never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoLeader
                | Self::NotLeader { .. }
                | Self::ProposalDropped { .. }
                | Self::ConsensusShutdown
                | Self::Timeout { .. }
                | Self::SessionClosed
                | Self::Transport { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, NotaryError>;

// Conversion from std::io::Error
impl From<std::io::Error> for NotaryError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NotaryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
