//! Session messaging over TCP: one connection per exchange, one
//! [`SessionRequest`] frame out and one [`SessionResponse`] frame back.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use notary_raft::frame::{decode_frame, read_frame, read_frame_bytes, write_frame};
use notary_types::{NodeId, NotarisationResponse, NotaryError, Result, SessionId};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};

use crate::{
    server::NotaryService,
    session::{NotaryChannel, SessionRequest, SessionResponse},
};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Requester side of the TCP session protocol.
#[derive(Debug, Clone)]
pub struct TcpNotaryChannel {
    addrs: HashMap<NodeId, SocketAddr>,
}

impl TcpNotaryChannel {
    pub fn new(addrs: HashMap<NodeId, SocketAddr>) -> Self {
        Self { addrs }
    }
}

#[async_trait]
impl NotaryChannel for TcpNotaryChannel {
    /// Connection failures, resets and truncated replies are all retryable.
    async fn exchange(&self, member: NodeId, request: SessionRequest) -> Result<SessionResponse> {
        let addr = *self.addrs.get(&member).ok_or(NotaryError::UnknownMember(member))?;
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| NotaryError::Transport {
                reason: format!("connect to {member} at {addr} timed out"),
            })?
            .map_err(|e| NotaryError::Transport {
                reason: format!("connect to {member} at {addr}: {e}"),
            })?;
        stream
            .set_nodelay(true)
            .map_err(|e| NotaryError::Transport { reason: e.to_string() })?;

        write_frame(&mut stream, &request).await?;
        read_frame(&mut stream).await?.ok_or(NotaryError::SessionClosed)
    }
}

/// Enough of a request to address an error reply.
#[derive(Deserialize)]
struct SessionHeader {
    session_id: SessionId,
    attempt: u32,
}

/// Serve notarisation sessions on `listener`.
pub async fn serve_notary(listener: TcpListener, service: Arc<NotaryService>) -> Result<()> {
    tracing::info!(
        addr = %listener.local_addr()?,
        notary = %service.legal_identity().name,
        "Notary listener started"
    );
    loop {
        let (socket, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Notary accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        tokio::spawn(serve_session(socket, remote, Arc::clone(&service)));
    }
}

async fn serve_session(mut socket: TcpStream, remote: SocketAddr, service: Arc<NotaryService>) {
    loop {
        let body = match read_frame_bytes(&mut socket).await {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(remote = %remote, error = %e, "Dropping session connection");
                return;
            }
        };
        let response = match decode_frame::<SessionRequest>(&body) {
            Ok(request) => service.handle(request).await,
            Err(err) => {
                let Ok(header) = decode_frame::<SessionHeader>(&body) else {
                    tracing::warn!(remote = %remote, error = %err, "Dropping unaddressable session frame");
                    return;
                };
                tracing::warn!(
                    remote = %remote,
                    session = %header.session_id,
                    error = %err,
                    "Refusing malformed notarisation request"
                );
                SessionResponse {
                    session_id: header.session_id,
                    attempt: header.attempt,
                    responder: service.node_id(),
                    response: NotarisationResponse::Error {
                        message: err.to_string(),
                    },
                }
            }
        };
        if let Err(e) = write_frame(&mut socket, &response).await {
            tracing::debug!(remote = %remote, error = %e, "Session reply not delivered");
            return;
        }
    }
}
