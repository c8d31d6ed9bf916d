//! Session messaging between requesters and notary members.
//!
//! A session is one notarisation attempt sequence identified by a
//! [`SessionId`]. Each attempt is a single request/response exchange with
//! one member; the attempt number lets the requester discard stale replies.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use notary_types::{NodeId, NotarisationRequest, NotarisationResponse, NotaryError, Result, SessionId};
use serde::{Deserialize, Serialize};

use crate::server::NotaryService;

/// Requester to member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: SessionId,
    pub attempt: u32,
    pub request: NotarisationRequest,
}

/// Member to requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub attempt: u32,
    /// Member that produced the reply; its id is its signing key.
    pub responder: NodeId,
    pub response: NotarisationResponse,
}

/// Send a request to one member and wait for its reply.
///
/// Implementations do not time out on their own; the requester bounds
/// every exchange.
#[async_trait]
pub trait NotaryChannel: Send + Sync {
    async fn exchange(&self, member: NodeId, request: SessionRequest) -> Result<SessionResponse>;
}

/// Link behaviour of a member on the [`LocalNotaryNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Up,
    /// Requests never arrive.
    Down,
    /// Requests are processed but replies are lost.
    DropReplies,
}

#[derive(Default)]
struct LocalRoutes {
    services: HashMap<NodeId, Arc<NotaryService>>,
    down: HashSet<NodeId>,
    dropping: HashSet<NodeId>,
}

/// In-process channel that calls services directly.
#[derive(Clone, Default)]
pub struct LocalNotaryNetwork {
    routes: Arc<RwLock<LocalRoutes>>,
}

impl LocalNotaryNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: Arc<NotaryService>) {
        let id = service.node_id();
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .services
            .insert(id, service);
    }

    pub fn set_link(&self, member: NodeId, mode: LinkMode) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.down.remove(&member);
        routes.dropping.remove(&member);
        match mode {
            LinkMode::Up => {}
            LinkMode::Down => {
                routes.down.insert(member);
            }
            LinkMode::DropReplies => {
                routes.dropping.insert(member);
            }
        }
    }

    fn route(&self, member: NodeId) -> Option<(Arc<NotaryService>, LinkMode)> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let service = routes.services.get(&member)?.clone();
        let mode = if routes.down.contains(&member) {
            LinkMode::Down
        } else if routes.dropping.contains(&member) {
            LinkMode::DropReplies
        } else {
            LinkMode::Up
        };
        Some((service, mode))
    }
}

#[async_trait]
impl NotaryChannel for LocalNotaryNetwork {
    async fn exchange(&self, member: NodeId, request: SessionRequest) -> Result<SessionResponse> {
        let (service, mode) = self.route(member).ok_or(NotaryError::UnknownMember(member))?;
        match mode {
            LinkMode::Up => Ok(service.handle(request).await),
            LinkMode::Down => std::future::pending().await,
            LinkMode::DropReplies => {
                let _lost = service.handle(request).await;
                std::future::pending().await
            }
        }
    }
}
