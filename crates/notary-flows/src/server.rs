//! Server side: the notary flow run for every incoming request.
//!
//! ```text
//! Received ─▶ ValidatingTimeWindow ─▶ [ValidatingTransaction] ─▶ Committing ─▶ Responding
//!    │                │                          │                    │
//!    └────────────────┴──────────────────────────┴──────▶ Rejected    └──▶ Signed
//! ```
//!
//! The flow never retries. Retryable consensus failures go back to the
//! requester as `NotLeader` so it can redirect.

use std::sync::Arc;

use notary_types::{
    CommitOutcome, CommitRequest, KeyPair, NodeId, NotarisationRequest, NotarisationResponse, NotaryError,
    NotaryServiceType, Party, RejectionReason, attestation_signing_payload, request_signing_payload,
};
use notary_uniqueness::UniquenessProvider;
use serde::Serialize;

use crate::{
    identity::{IdentityService, OpenIdentityService},
    session::{SessionRequest, SessionResponse},
    time_window::TimeWindowChecker,
    verifier::{NoContractVerifier, TransactionVerifier},
};

/// Progress of one notary flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotaryFlowStep {
    Received,
    ValidatingTimeWindow,
    ValidatingTransaction,
    Committing,
    Responding,
    Signed,
    Rejected,
}

/// Result of running a flow: the reply and every step visited.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub response: NotarisationResponse,
    pub steps: Vec<NotaryFlowStep>,
}

/// A notary cluster member's request handler.
pub struct NotaryService {
    legal_identity: Party,
    key: KeyPair,
    service_type: NotaryServiceType,
    checker: TimeWindowChecker,
    provider: Arc<dyn UniquenessProvider>,
    identities: Arc<dyn IdentityService>,
    verifier: Arc<dyn TransactionVerifier>,
}

impl NotaryService {
    /// A service signing with `key` as `legal_name`, trusting any
    /// self-consistent requester and no contract rules.
    pub fn new(
        legal_name: impl Into<String>,
        key: KeyPair,
        service_type: NotaryServiceType,
        checker: TimeWindowChecker,
        provider: Arc<dyn UniquenessProvider>,
    ) -> Self {
        let legal_identity = Party::new(legal_name, key.public_key());
        Self {
            legal_identity,
            key,
            service_type,
            checker,
            provider,
            identities: Arc::new(OpenIdentityService),
            verifier: Arc::new(NoContractVerifier),
        }
    }

    #[must_use]
    pub fn with_identity_service(mut self, identities: Arc<dyn IdentityService>) -> Self {
        self.identities = identities;
        self
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn TransactionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn legal_identity(&self) -> &Party {
        &self.legal_identity
    }

    /// Member id: the public key this member signs with.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_key(self.key.public_key())
    }

    pub fn service_type(&self) -> NotaryServiceType {
        self.service_type
    }

    /// Answer one session message.
    pub async fn handle(&self, message: SessionRequest) -> SessionResponse {
        let outcome = NotaryFlow::new(self).run(&message.request).await;
        SessionResponse {
            session_id: message.session_id,
            attempt: message.attempt,
            responder: self.node_id(),
            response: outcome.response,
        }
    }

    /// Run the notary flow for `request`.
    pub async fn notarise(&self, request: &NotarisationRequest) -> FlowOutcome {
        NotaryFlow::new(self).run(request).await
    }
}

/// One execution of the server-side state machine.
pub struct NotaryFlow<'a> {
    service: &'a NotaryService,
    steps: Vec<NotaryFlowStep>,
}

impl<'a> NotaryFlow<'a> {
    pub fn new(service: &'a NotaryService) -> Self {
        Self {
            service,
            steps: Vec::with_capacity(6),
        }
    }

    fn enter(&mut self, step: NotaryFlowStep) {
        tracing::trace!(?step, "Notary flow step");
        self.steps.push(step);
    }

    fn finish(mut self, request: &NotarisationRequest, response: NotarisationResponse) -> FlowOutcome {
        match &response {
            NotarisationResponse::Signed { .. } => {
                self.enter(NotaryFlowStep::Responding);
                self.enter(NotaryFlowStep::Signed);
                tracing::info!(
                    tx_id = %request.tx_id,
                    requester = %request.requester,
                    inputs = request.inputs.len(),
                    service = %self.service.service_type,
                    "Transaction notarised"
                );
            }
            NotarisationResponse::Rejected { reason } => {
                self.enter(NotaryFlowStep::Responding);
                self.enter(NotaryFlowStep::Rejected);
                tracing::warn!(tx_id = %request.tx_id, requester = %request.requester, ?reason, "Notarisation rejected");
            }
            NotarisationResponse::NotLeader { leader_hint } => {
                self.enter(NotaryFlowStep::Responding);
                tracing::debug!(tx_id = %request.tx_id, ?leader_hint, "Redirecting requester");
            }
            NotarisationResponse::Error { message } => {
                self.enter(NotaryFlowStep::Responding);
                tracing::error!(tx_id = %request.tx_id, error = %message, "Notarisation failed");
            }
        }
        FlowOutcome {
            response,
            steps: self.steps,
        }
    }

    /// Drive the request to a terminal response.
    pub async fn run(mut self, request: &NotarisationRequest) -> FlowOutcome {
        self.enter(NotaryFlowStep::Received);
        if let Err(reason) = self.check_received(request) {
            return self.finish(request, reject(reason));
        }

        self.enter(NotaryFlowStep::ValidatingTimeWindow);
        if let Err(err) = self.service.checker.check(request.time_window.as_ref(), request.tx_id) {
            tracing::debug!(tx_id = %request.tx_id, error = %err, now = %self.service.checker.now(), "Time window check failed");
            return self.finish(request, reject(RejectionReason::TimeWindowInvalid));
        }

        if self.service.service_type.is_validating() {
            self.enter(NotaryFlowStep::ValidatingTransaction);
            if let Err(reason) = self.validate_transaction(request) {
                return self.finish(request, reject(reason));
            }
        }

        self.enter(NotaryFlowStep::Committing);
        let response = self.commit(request).await;
        self.finish(request, response)
    }

    fn check_received(&self, request: &NotarisationRequest) -> Result<(), RejectionReason> {
        let payload = request_signing_payload(&request.tx_id);
        self.service
            .identities
            .verify(&request.requester, &payload, &request.requester_signature)
            .map_err(|e| RejectionReason::InvalidSignature { detail: e.to_string() })
    }

    fn validate_transaction(&self, request: &NotarisationRequest) -> Result<(), RejectionReason> {
        let invalid = |detail: String| RejectionReason::TransactionInvalid { detail };
        let Some(stx) = request.transaction.as_ref() else {
            return Err(invalid("validating notary requires the full transaction".into()));
        };

        let computed = stx.id();
        if computed != request.tx_id {
            return Err(invalid(
                NotaryError::TransactionIdMismatch {
                    declared: request.tx_id,
                    computed,
                }
                .to_string(),
            ));
        }
        if stx.tx.inputs != request.inputs {
            return Err(invalid("request inputs differ from transaction inputs".into()));
        }
        if stx.tx.time_window != request.time_window {
            return Err(invalid("request time window differs from transaction".into()));
        }
        stx.tx.check_distinct_inputs().map_err(|e| invalid(e.to_string()))?;
        stx.verify_signatures_except(&[self.service.key.public_key()])
            .map_err(|e| RejectionReason::InvalidSignature { detail: e.to_string() })?;
        self.service.verifier.verify(stx).map_err(|e| invalid(e.to_string()))
    }

    async fn commit(&self, request: &NotarisationRequest) -> NotarisationResponse {
        let commit = match CommitRequest::new(
            request.requester.clone(),
            request.tx_id,
            request.inputs.iter().copied(),
            request.time_window,
        ) {
            Ok(commit) => commit,
            Err(e) => return reject(RejectionReason::TransactionInvalid { detail: e.to_string() }),
        };

        match self.service.provider.commit_request(&commit).await {
            Ok(CommitOutcome::Committed) => NotarisationResponse::Signed {
                signature: self.service.key.sign(&attestation_signing_payload(&request.tx_id)),
            },
            Ok(CommitOutcome::Conflict(conflict)) => reject(RejectionReason::Conflict { conflict }),
            Err(NotaryError::NotLeader { leader_hint }) => NotarisationResponse::NotLeader { leader_hint },
            Err(e) if e.is_retryable() => {
                tracing::debug!(tx_id = %request.tx_id, error = %e, "Commit not decided, asking requester to retry");
                NotarisationResponse::NotLeader { leader_hint: None }
            }
            Err(e) => NotarisationResponse::Error { message: e.to_string() },
        }
    }
}

fn reject(reason: RejectionReason) -> NotarisationResponse {
    NotarisationResponse::Rejected { reason }
}
