//! One cluster member wired over TCP.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use notary_flows::{NotaryService, TimeWindowChecker, serve_notary};
use notary_raft::{FileLogStorage, RaftMessage, RaftStatus, RaftTransport, TcpTransport, serve_raft};
use notary_types::{Clock, CommitRequest, NodeId, NotaryConfig, NotaryError, Result, SystemClock};
use notary_uniqueness::{CommitLog, InMemoryUniquenessProvider, RaftUniquenessProvider, UniquenessProvider};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};

use crate::keys::load_key;

/// A running notary member.
pub struct NotaryNode {
    id: NodeId,
    service: Arc<NotaryService>,
    log: Option<CommitLog>,
    notary_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl NotaryNode {
    /// Load the member key, validate `config` against it and start serving.
    ///
    /// Clustered service types replicate through Raft with the log kept in
    /// `data_dir`; the others keep the uniqueness record in memory.
    pub async fn start(config: NotaryConfig) -> Result<Self> {
        let key = load_key(&config.key_seed_path)?;
        let id = NodeId::from_key(key.public_key());
        config.validate(&id)?;
        let local = config
            .cluster
            .member(&id)
            .cloned()
            .ok_or_else(|| NotaryError::Configuration(format!("{id} is not a cluster member")))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let checker = TimeWindowChecker::from_millis(Arc::clone(&clock), config.time_tolerance_ms);
        let mut tasks = Vec::new();

        let (provider, log): (Arc<dyn UniquenessProvider>, Option<CommitLog>) = if config.service.is_clustered() {
            let storage = FileLogStorage::open(config.data_dir.join("raft"))?;
            let peers: HashMap<NodeId, SocketAddr> = config
                .cluster
                .members
                .iter()
                .filter(|m| m.node_id != id)
                .map(|m| (m.node_id, m.raft_addr))
                .collect();
            let transport: Arc<dyn RaftTransport<CommitRequest>> = Arc::new(TcpTransport::new(peers));

            let listener = TcpListener::bind(local.raft_addr).await?;
            let (inbox_tx, inbox) = mpsc::unbounded_channel::<(NodeId, RaftMessage<CommitRequest>)>();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = serve_raft(listener, inbox_tx).await {
                    tracing::error!(error = %e, "Raft listener failed");
                }
            }));

            let provider = RaftUniquenessProvider::start(
                id,
                &config.cluster.node_ids(),
                config.raft.clone(),
                storage,
                transport,
                inbox,
                Arc::clone(&clock),
            );
            let log = provider.log().clone();
            (Arc::new(provider), Some(log))
        } else {
            (Arc::new(InMemoryUniquenessProvider::new(clock)), None)
        };

        let service = Arc::new(NotaryService::new(
            config.legal_name.clone(),
            key,
            config.service,
            checker,
            provider,
        ));

        let listener = TcpListener::bind(local.notary_addr).await?;
        let notary_addr = listener.local_addr()?;
        let serving = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_notary(listener, serving).await {
                tracing::error!(error = %e, "Notary listener failed");
            }
        }));

        tracing::info!(
            node = %id,
            legal_name = %config.legal_name,
            service = %config.service,
            members = config.cluster.members.len(),
            notary_addr = %notary_addr,
            "Notary member started"
        );
        Ok(Self {
            id,
            service,
            log,
            notary_addr,
            tasks,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn service(&self) -> &Arc<NotaryService> {
        &self.service
    }

    /// Address notarisation sessions are accepted on.
    pub fn notary_addr(&self) -> SocketAddr {
        self.notary_addr
    }

    /// Raft status, for clustered members.
    pub fn status(&self) -> Option<RaftStatus> {
        self.log.as_ref().map(CommitLog::status)
    }

    /// Serve until Ctrl-C, then stop.
    pub async fn run_until_shutdown(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        tracing::info!(node = %self.id, "Shutdown requested");
        self.shutdown();
        Ok(())
    }

    pub fn shutdown(self) {
        if let Some(log) = &self.log {
            log.shutdown();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}
