//! Client side: drive one notarisation to a signature or a typed failure.
//!
//! ```text
//!            ┌──────────── redirect to leader ─────────────┐
//!            ▼                                             │
//! Start ─▶ AwaitingResponse ── timeout / no leader ─▶ BackingOff
//!            │                                             │
//!            │ Signed / Rejected / Error                   │ next member
//!            ▼                                             ▼
//!          result                                  AwaitingResponse
//! ```
//!
//! The same request is resent on every attempt. That is safe because a
//! commit of the same transaction id is idempotent on the cluster.

use std::sync::Arc;

use notary_types::{
    DigitalSignature, KeyPair, NodeId, NotarisationRequest, NotarisationResponse, NotaryError, Party,
    RequesterConfig, Result, SessionId, SignedTransaction, TransactionId, attestation_signing_payload,
};

use crate::{
    checkpoint::{CheckpointStore, InMemoryCheckpointStore, RequesterCheckpoint, RequesterStep},
    session::{NotaryChannel, SessionRequest, SessionResponse},
};

/// What a single attempt decided.
enum Attempt {
    Done(Result<DigitalSignature>),
    Retry {
        redirect: Option<NodeId>,
        failure: NotaryError,
    },
}

/// Client flow that collects a notary signature.
pub struct NotarisationRequester {
    channel: Arc<dyn NotaryChannel>,
    members: Vec<NodeId>,
    config: RequesterConfig,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl NotarisationRequester {
    /// `members` are the cluster's member ids; the first is tried first.
    pub fn new(channel: Arc<dyn NotaryChannel>, members: Vec<NodeId>, config: RequesterConfig) -> Self {
        Self {
            channel,
            members,
            config,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        }
    }

    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Build the request for `stx` and notarise it.
    pub async fn notarise_transaction(
        &self,
        stx: &SignedTransaction,
        requester: Party,
        key: &KeyPair,
        validating: bool,
    ) -> Result<DigitalSignature> {
        let request = if validating {
            NotarisationRequest::validating(stx, requester, key)
        } else {
            NotarisationRequest::non_validating(stx, requester, key)
        };
        self.notarise(request).await
    }

    /// Start a new session for `request`.
    pub async fn notarise(&self, request: NotarisationRequest) -> Result<DigitalSignature> {
        let checkpoint = RequesterCheckpoint {
            session_id: SessionId::new(),
            request,
            step: RequesterStep::Start,
        };
        tracing::info!(
            session = %checkpoint.session_id,
            tx_id = %checkpoint.request.tx_id,
            inputs = checkpoint.request.inputs.len(),
            "Requesting notarisation"
        );
        self.drive(checkpoint).await
    }

    /// Continue a session from its last checkpoint.
    pub async fn resume(&self, session_id: SessionId) -> Result<DigitalSignature> {
        let checkpoint = self.checkpoints.load(session_id)?.ok_or_else(|| {
            NotaryError::Internal(format!("no checkpoint for session {session_id}"))
        })?;
        tracing::info!(session = %session_id, step = ?checkpoint.step, "Resuming notarisation");
        self.drive(checkpoint).await
    }

    async fn drive(&self, mut checkpoint: RequesterCheckpoint) -> Result<DigitalSignature> {
        let Some(&first) = self.members.first() else {
            return Err(NotaryError::Configuration("requester has no notary members".into()));
        };
        loop {
            match checkpoint.step {
                RequesterStep::Start => {
                    checkpoint.step = RequesterStep::AwaitingResponse {
                        member: first,
                        attempt: 1,
                    };
                }
                RequesterStep::AwaitingResponse { member, attempt } => {
                    self.checkpoints.save(&checkpoint)?;
                    let message = SessionRequest {
                        session_id: checkpoint.session_id,
                        attempt,
                        request: checkpoint.request.clone(),
                    };
                    let reply = tokio::time::timeout(
                        self.config.response_timeout(),
                        self.channel.exchange(member, message),
                    )
                    .await;

                    let outcome = match reply {
                        Ok(Ok(reply)) => self.on_reply(&checkpoint, member, attempt, reply),
                        Ok(Err(err)) if err.is_retryable() => Attempt::Retry {
                            redirect: None,
                            failure: err,
                        },
                        Ok(Err(err)) => Attempt::Done(Err(err)),
                        Err(_) => Attempt::Retry {
                            redirect: None,
                            failure: NotaryError::Timeout {
                                member,
                                timeout_ms: self.config.response_timeout_ms,
                            },
                        },
                    };

                    match outcome {
                        Attempt::Done(result) => return self.finish(&checkpoint, result),
                        Attempt::Retry { redirect, failure } => {
                            match self.next_step(member, attempt, redirect, failure) {
                                Ok(step) => checkpoint.step = step,
                                Err(err) => return self.finish(&checkpoint, Err(err)),
                            }
                        }
                    }
                }
                RequesterStep::BackingOff { member, attempt } => {
                    self.checkpoints.save(&checkpoint)?;
                    tokio::time::sleep(self.config.retry_backoff()).await;
                    checkpoint.step = RequesterStep::AwaitingResponse { member, attempt };
                }
            }
        }
    }

    fn on_reply(
        &self,
        checkpoint: &RequesterCheckpoint,
        member: NodeId,
        attempt: u32,
        reply: SessionResponse,
    ) -> Attempt {
        let tx_id = checkpoint.request.tx_id;
        if reply.session_id != checkpoint.session_id || reply.attempt != attempt {
            return Attempt::Retry {
                redirect: None,
                failure: NotaryError::UnexpectedMessage {
                    reason: format!(
                        "reply for session {} attempt {} while awaiting attempt {attempt}",
                        reply.session_id, reply.attempt
                    ),
                },
            };
        }

        match reply.response {
            NotarisationResponse::Signed { signature } => Attempt::Done(
                self.verify_notary_signature(reply.responder, &signature, &tx_id)
                    .map(|()| signature),
            ),
            NotarisationResponse::Rejected { reason } => Attempt::Done(Err(reason.into_error(tx_id))),
            NotarisationResponse::NotLeader { leader_hint } => {
                let redirect =
                    leader_hint.filter(|leader| *leader != member && self.members.contains(leader));
                tracing::debug!(
                    session = %checkpoint.session_id,
                    from = %member,
                    ?redirect,
                    "Member is not the leader"
                );
                Attempt::Retry {
                    redirect,
                    failure: NotaryError::NotLeader { leader_hint },
                }
            }
            NotarisationResponse::Error { message } => {
                Attempt::Done(Err(NotaryError::RemoteError { message }))
            }
        }
    }

    /// The signature must come from the member that replied, over the attestation payload.
    fn verify_notary_signature(
        &self,
        responder: NodeId,
        signature: &DigitalSignature,
        tx_id: &TransactionId,
    ) -> Result<()> {
        if !self.members.contains(&responder) {
            return Err(NotaryError::UnknownMember(responder));
        }
        if signature.by != responder.key() {
            return Err(NotaryError::InvalidSignature {
                reason: format!("signature by {} does not belong to responder {responder}", signature.by),
            });
        }
        signature.verify(&attestation_signing_payload(tx_id))
    }

    fn next_step(
        &self,
        member: NodeId,
        attempt: u32,
        redirect: Option<NodeId>,
        failure: NotaryError,
    ) -> Result<RequesterStep> {
        if attempt >= self.config.max_attempts {
            tracing::warn!(attempts = attempt, last_error = %failure, "Giving up on notarisation");
            return Err(match failure {
                timeout @ NotaryError::Timeout { .. } => timeout,
                _ => NotaryError::RetriesExhausted { attempts: attempt },
            });
        }

        let attempt = attempt + 1;
        if let Some(leader) = redirect {
            tracing::debug!(to = %leader, attempt, "Following leader redirect");
            return Ok(RequesterStep::AwaitingResponse {
                member: leader,
                attempt,
            });
        }

        let next = self.member_after(member);
        tracing::warn!(
            failed = %member,
            next = %next,
            attempt,
            error = %failure,
            "Notarisation attempt failed, retrying"
        );
        Ok(RequesterStep::BackingOff {
            member: next,
            attempt,
        })
    }

    /// Round-robin over members; unknown members restart at the front.
    fn member_after(&self, member: NodeId) -> NodeId {
        let next = self
            .members
            .iter()
            .position(|m| *m == member)
            .map_or(0, |position| (position + 1) % self.members.len());
        self.members[next]
    }

    fn finish(
        &self,
        checkpoint: &RequesterCheckpoint,
        result: Result<DigitalSignature>,
    ) -> Result<DigitalSignature> {
        if let Err(err) = self.checkpoints.remove(checkpoint.session_id) {
            tracing::warn!(session = %checkpoint.session_id, error = %err, "Failed to clear checkpoint");
        }
        match &result {
            Ok(signature) => tracing::info!(
                session = %checkpoint.session_id,
                tx_id = %checkpoint.request.tx_id,
                notary = %signature.by,
                "Notarisation complete"
            ),
            Err(err) => tracing::warn!(
                session = %checkpoint.session_id,
                tx_id = %checkpoint.request.tx_id,
                error = %err,
                "Notarisation failed"
            ),
        }
        result
    }
}
