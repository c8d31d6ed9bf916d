//! TCP transport: one outbound connection per peer, frames of
//! [`RaftEnvelope`].

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use notary_types::{NodeId, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

use crate::{
    frame::{read_frame, write_frame},
    log::Command,
    rpc::{RaftEnvelope, RaftMessage},
    transport::RaftTransport,
};

/// Messages queued per peer before new ones are dropped.
const PEER_QUEUE_DEPTH: usize = 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Outbound half of the TCP transport.
///
/// Each peer gets a writer task that (re)connects lazily. While a peer is
/// unreachable its messages are discarded; Raft retransmits.
pub struct TcpTransport<C> {
    outboxes: HashMap<NodeId, mpsc::Sender<RaftEnvelope<C>>>,
}

impl<C: Command> TcpTransport<C> {
    /// Spawn writer tasks for `peers`. Must run inside a tokio runtime.
    pub fn new(peers: HashMap<NodeId, SocketAddr>) -> Self {
        let outboxes = peers
            .into_iter()
            .map(|(peer, addr)| {
                let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
                tokio::spawn(peer_writer(peer, addr, rx));
                (peer, tx)
            })
            .collect();
        Self { outboxes }
    }
}

impl<C: Command> RaftTransport<C> for TcpTransport<C> {
    fn send(&self, from: NodeId, to: NodeId, message: RaftMessage<C>) {
        let Some(outbox) = self.outboxes.get(&to) else {
            tracing::warn!(to = %to, "No route to peer");
            return;
        };
        if outbox.try_send(RaftEnvelope { from, message }).is_err() {
            tracing::debug!(to = %to, "Peer queue full, message dropped");
        }
    }
}

async fn peer_writer<C: Command>(peer: NodeId, addr: SocketAddr, mut rx: mpsc::Receiver<RaftEnvelope<C>>) {
    let mut stream: Option<TcpStream> = None;
    while let Some(envelope) = rx.recv().await {
        if stream.is_none() {
            match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(connected)) => {
                    let _ = connected.set_nodelay(true);
                    tracing::debug!(peer = %peer, addr = %addr, "Connected to peer");
                    stream = Some(connected);
                }
                Ok(Err(e)) => {
                    tracing::trace!(peer = %peer, addr = %addr, error = %e, "Peer unreachable");
                    continue;
                }
                Err(_) => {
                    tracing::trace!(peer = %peer, addr = %addr, "Peer connect timed out");
                    continue;
                }
            }
        }
        if let Some(conn) = stream.as_mut() {
            if let Err(e) = write_frame(conn, &envelope).await {
                tracing::debug!(peer = %peer, error = %e, "Peer connection lost");
                stream = None;
            }
        }
    }
}

/// Accept Raft connections on `listener` and forward every envelope to
/// `inbox`. Runs until the inbox is closed; failed accepts are logged and
/// retried.
pub async fn serve_raft<C: Command>(
    listener: TcpListener,
    inbox: mpsc::UnboundedSender<(NodeId, RaftMessage<C>)>,
) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "Raft listener started");
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = inbox.closed() => return Ok(()),
        };
        let (mut socket, remote) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Raft accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        let inbox = inbox.clone();
        tokio::spawn(async move {
            loop {
                match read_frame::<_, RaftEnvelope<C>>(&mut socket).await {
                    Ok(Some(envelope)) => {
                        if inbox.send((envelope.from, envelope.message)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!(remote = %remote, error = %e, "Dropping Raft connection");
                        return;
                    }
                }
            }
        });
    }
}
