//! Notarisation wire messages.
//!
//! ```text
//! requester ── NotarisationRequest ──▶ notary member
//!           ◀─ NotarisationResponse ──
//! ```
//!
//! The request carries the transaction id, its ordered inputs, the declared
//! time window and the requester's signature over the id. Validating
//! notaries additionally receive the full signed transaction.

use serde::{Deserialize, Serialize};

use crate::{
    Conflict, DigitalSignature, KeyPair, NodeId, NotaryError, Party, SignedTransaction,
    StateRef, TimeWindow, TransactionId, constants,
};

/// Payload the requester signs: `domain_sep || tx_id`.
#[must_use]
pub fn request_signing_payload(tx_id: &TransactionId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);
    payload.extend_from_slice(constants::REQUEST_SIGNING_DOMAIN);
    payload.extend_from_slice(tx_id.as_bytes());
    payload
}

/// Payload a notary member signs to attest uniqueness: `domain_sep || tx_id`.
#[must_use]
pub fn attestation_signing_payload(tx_id: &TransactionId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);
    payload.extend_from_slice(constants::ATTESTATION_SIGNING_DOMAIN);
    payload.extend_from_slice(tx_id.as_bytes());
    payload
}

/// A request to notarise one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarisationRequest {
    /// Id of the transaction to notarise.
    pub tx_id: TransactionId,
    /// Inputs the transaction consumes, in declaration order.
    pub inputs: Vec<StateRef>,
    /// Declared validity interval.
    pub time_window: Option<TimeWindow>,
    /// Party asking for notarisation.
    pub requester: Party,
    /// Requester's signature over [`request_signing_payload`].
    pub requester_signature: DigitalSignature,
    /// Full transaction, present when talking to a validating notary.
    pub transaction: Option<SignedTransaction>,
}

impl NotarisationRequest {
    /// Request for a non-validating notary: only the essential parts travel.
    #[must_use]
    pub fn non_validating(stx: &SignedTransaction, requester: Party, key: &KeyPair) -> Self {
        let tx_id = stx.id();
        Self {
            tx_id,
            inputs: stx.tx.inputs.clone(),
            time_window: stx.tx.time_window,
            requester,
            requester_signature: key.sign(&request_signing_payload(&tx_id)),
            transaction: None,
        }
    }

    /// Request for a validating notary: the full transaction travels too.
    #[must_use]
    pub fn validating(stx: &SignedTransaction, requester: Party, key: &KeyPair) -> Self {
        Self {
            transaction: Some(stx.clone()),
            ..Self::non_validating(stx, requester, key)
        }
    }
}

/// Why a notary refused to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Submitted outside the declared window plus tolerance.
    TimeWindowInvalid,
    /// Inputs already consumed by other transactions.
    Conflict { conflict: Conflict },
    /// Requester or transaction signatures did not verify.
    InvalidSignature { detail: String },
    /// The request or transaction is malformed or fails verification.
    TransactionInvalid { detail: String },
}

impl RejectionReason {
    /// Map a rejection back into the typed error a requester surfaces.
    #[must_use]
    pub fn into_error(self, tx_id: TransactionId) -> NotaryError {
        match self {
            Self::TimeWindowInvalid => NotaryError::TimeWindowInvalid(tx_id),
            Self::Conflict { conflict } => NotaryError::Conflict(conflict),
            Self::InvalidSignature { detail } => NotaryError::InvalidSignature { reason: detail },
            Self::TransactionInvalid { detail } => {
                NotaryError::TransactionInvalid { reason: detail }
            }
        }
    }
}

/// Reply from a notary member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotarisationResponse {
    /// The member's signature over [`attestation_signing_payload`].
    Signed { signature: DigitalSignature },
    /// Terminal refusal.
    Rejected { reason: RejectionReason },
    /// This member cannot commit right now; retry at `leader_hint` if given.
    NotLeader { leader_hint: Option<NodeId> },
    /// Generic failure.
    Error { message: String },
}
