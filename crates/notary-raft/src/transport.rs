//! Message delivery between cluster members.
//!
//! Raft tolerates loss, duplication and reordering, so transports are
//! fire-and-forget: `send` never blocks and never reports failure.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use notary_types::NodeId;
use tokio::sync::mpsc;

use crate::rpc::RaftMessage;

/// Receiving end handed to a [`crate::RaftNode`].
pub type Inbox<C> = mpsc::UnboundedReceiver<(NodeId, RaftMessage<C>)>;

/// Outgoing side of a transport.
pub trait RaftTransport<C>: Send + Sync + 'static {
    fn send(&self, from: NodeId, to: NodeId, message: RaftMessage<C>);
}

struct Routes<C> {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<(NodeId, RaftMessage<C>)>>,
    isolated: HashSet<NodeId>,
}

/// In-process router for tests and the single-process demo.
///
/// Supports partitions: an isolated member neither sends nor receives.
pub struct LocalNetwork<C> {
    routes: Arc<Mutex<Routes<C>>>,
}

impl<C> Clone for LocalNetwork<C> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<C> Default for LocalNetwork<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> LocalNetwork<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Arc::new(Mutex::new(Routes {
                inboxes: HashMap::new(),
                isolated: HashSet::new(),
            })),
        }
    }

    fn with_routes<R>(&self, f: impl FnOnce(&mut Routes<C>) -> R) -> R {
        let mut routes = self
            .routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut routes)
    }

    /// Attach a member and return its inbox. Re-registering replaces the
    /// previous inbox.
    pub fn register(&self, id: NodeId) -> Inbox<C> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_routes(|r| {
            r.inboxes.insert(id, tx);
            r.isolated.remove(&id);
        });
        rx
    }

    /// Cut a member off from everyone.
    pub fn isolate(&self, id: NodeId) {
        tracing::debug!(node = %id, "Isolating member");
        self.with_routes(|r| {
            r.isolated.insert(id);
        });
    }

    pub fn heal(&self, id: NodeId) {
        tracing::debug!(node = %id, "Healing member");
        self.with_routes(|r| {
            r.isolated.remove(&id);
        });
    }

    /// Detach a member entirely.
    pub fn remove(&self, id: NodeId) {
        self.with_routes(|r| {
            r.inboxes.remove(&id);
            r.isolated.remove(&id);
        });
    }
}

impl<C: Send + 'static> RaftTransport<C> for LocalNetwork<C> {
    fn send(&self, from: NodeId, to: NodeId, message: RaftMessage<C>) {
        let target = self.with_routes(|r| {
            if r.isolated.contains(&from) || r.isolated.contains(&to) {
                None
            } else {
                r.inboxes.get(&to).cloned()
            }
        });
        if let Some(tx) = target {
            // Receiver gone means the member stopped.
            let _ = tx.send((from, message));
        }
    }
}
