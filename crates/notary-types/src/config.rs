//! Configuration types for notary cluster members and requesters.

use std::{collections::HashSet, fmt, net::SocketAddr, path::{Path, PathBuf}, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{NodeId, NotaryError, Result, constants};

/// Which server flow runs and which uniqueness provider backs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotaryServiceType {
    /// Uniqueness only, single node, in-memory provider.
    Simple,
    /// Full transaction verification, single node, in-memory provider.
    Validating,
    /// Uniqueness only, replicated through Raft.
    RaftSimple,
    /// Full transaction verification, replicated through Raft.
    RaftValidating,
}

impl NotaryServiceType {
    /// Stable identifier advertised for this service.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Simple => "notary.simple",
            Self::Validating => "notary.validating",
            Self::RaftSimple => "notary.simple.raft",
            Self::RaftValidating => "notary.validating.raft",
        }
    }

    /// Whether the server flow re-verifies the full transaction.
    #[must_use]
    pub fn is_validating(self) -> bool {
        matches!(self, Self::Validating | Self::RaftValidating)
    }

    /// Whether uniqueness is replicated across a cluster.
    #[must_use]
    pub fn is_clustered(self) -> bool {
        matches!(self, Self::RaftSimple | Self::RaftValidating)
    }
}

impl fmt::Display for NotaryServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One member of the notary cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Member identity (its public key).
    pub node_id: NodeId,
    /// Address the member accepts Raft traffic on.
    pub raft_addr: SocketAddr,
    /// Address the member accepts notarisation sessions on.
    pub notary_addr: SocketAddr,
}

/// Fixed cluster membership. No dynamic reconfiguration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub members: Vec<ClusterMember>,
}

impl ClusterConfig {
    /// Node ids of every member, in configuration order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.node_id).collect()
    }

    #[must_use]
    pub fn member(&self, node_id: &NodeId) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.node_id == *node_id)
    }

    /// Votes needed for a strict majority of the cluster.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// Membership must be non-empty with unique node ids.
    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(NotaryError::Configuration(
                "cluster must have at least one member".into(),
            ));
        }
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.node_id) {
                return Err(NotaryError::Configuration(format!(
                    "duplicate cluster member {}",
                    member.node_id
                )));
            }
        }
        Ok(())
    }
}

/// Raft timing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub max_entries_per_append: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: constants::DEFAULT_ELECTION_TIMEOUT_MIN_MS,
            election_timeout_max_ms: constants::DEFAULT_ELECTION_TIMEOUT_MAX_MS,
            heartbeat_interval_ms: constants::DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_entries_per_append: constants::DEFAULT_MAX_ENTRIES_PER_APPEND,
        }
    }
}

impl RaftConfig {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Election timeouts must form a non-empty range above the heartbeat.
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(NotaryError::Configuration(format!(
                "election_timeout_min_ms ({}) must be below election_timeout_max_ms ({})",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(NotaryError::Configuration(format!(
                "heartbeat_interval_ms ({}) must be positive and below election_timeout_min_ms ({})",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.max_entries_per_append == 0 {
            return Err(NotaryError::Configuration(
                "max_entries_per_append must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Retry policy of the client-side notarisation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    pub response_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: constants::DEFAULT_RESPONSE_TIMEOUT_MS,
            max_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: constants::DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl RequesterConfig {
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_tolerance_ms() -> u64 {
    constants::DEFAULT_TIME_TOLERANCE_MS
}

/// Configuration for a single notary member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotaryConfig {
    /// Legal name the service signs as.
    pub legal_name: String,
    /// File holding this member's hex-encoded signing seed.
    pub key_seed_path: PathBuf,
    /// Service flavour.
    pub service: NotaryServiceType,
    /// Directory for the durable Raft log.
    pub data_dir: PathBuf,
    /// Time-window tolerance.
    #[serde(default = "default_tolerance_ms")]
    pub time_tolerance_ms: u64,
    /// Cluster membership (a single entry for non-clustered services).
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub raft: RaftConfig,
    #[serde(default)]
    pub requester: RequesterConfig,
}

impl NotaryConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            NotaryError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            NotaryError::Configuration(format!("cannot parse {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    #[must_use]
    pub fn time_tolerance(&self) -> Duration {
        Duration::from_millis(self.time_tolerance_ms)
    }

    /// Check the config is internally consistent for `local` as this member.
    pub fn validate(&self, local: &NodeId) -> Result<()> {
        self.cluster.validate()?;
        self.raft.validate()?;
        if self.cluster.member(local).is_none() {
            return Err(NotaryError::Configuration(format!(
                "local node {local} is not listed in the cluster"
            )));
        }
        if !self.service.is_clustered() && self.cluster.members.len() > 1 {
            return Err(NotaryError::Configuration(format!(
                "service {} is single-node but {} members are configured",
                self.service,
                self.cluster.members.len()
            )));
        }
        if self.requester.max_attempts == 0 {
            return Err(NotaryError::Configuration(
                "requester.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(byte: u8, port: u16) -> ClusterMember {
        ClusterMember {
            node_id: NodeId::from_bytes([byte; 32]),
            raft_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            notary_addr: SocketAddr::from(([127, 0, 0, 1], port + 100)),
        }
    }

    fn config(service: NotaryServiceType, members: Vec<ClusterMember>) -> NotaryConfig {
        NotaryConfig {
            legal_name: "Notary".into(),
            key_seed_path: PathBuf::from("notary.seed"),
            service,
            data_dir: PathBuf::from("data"),
            time_tolerance_ms: constants::DEFAULT_TIME_TOLERANCE_MS,
            cluster: ClusterConfig { members },
            raft: RaftConfig::default(),
            requester: RequesterConfig::default(),
        }
    }

    #[test]
    fn service_type_ids() {
        assert_eq!(NotaryServiceType::RaftValidating.id(), "notary.validating.raft");
        assert!(NotaryServiceType::RaftValidating.is_validating());
        assert!(NotaryServiceType::RaftSimple.is_clustered());
        assert!(!NotaryServiceType::Simple.is_clustered());
    }

    #[test]
    fn quorum_is_strict_majority() {
        let three = ClusterConfig {
            members: vec![member(1, 1), member(2, 2), member(3, 3)],
        };
        assert_eq!(three.quorum(), 2);
        let four = ClusterConfig {
            members: vec![member(1, 1), member(2, 2), member(3, 3), member(4, 4)],
        };
        assert_eq!(four.quorum(), 3);
    }

    #[test]
    fn duplicate_members_rejected() {
        let cfg = ClusterConfig {
            members: vec![member(1, 1), member(1, 2)],
        };
        assert!(matches!(cfg.validate(), Err(NotaryError::Configuration(_))));
    }

    #[test]
    fn raft_defaults_validate() {
        assert!(RaftConfig::default().validate().is_ok());
        let bad = RaftConfig {
            heartbeat_interval_ms: 500,
            ..RaftConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn local_node_must_be_member() {
        let cfg = config(NotaryServiceType::RaftSimple, vec![member(1, 1), member(2, 2)]);
        assert!(cfg.validate(&NodeId::from_bytes([1; 32])).is_ok());
        assert!(cfg.validate(&NodeId::from_bytes([9; 32])).is_err());
    }

    #[test]
    fn single_node_service_rejects_cluster() {
        let cfg = config(NotaryServiceType::Simple, vec![member(1, 1), member(2, 2)]);
        assert!(cfg.validate(&NodeId::from_bytes([1; 32])).is_err());
    }

    #[test]
    fn load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notary.json");
        let json = format!(
            r#"{{
                "legal_name": "Notary",
                "key_seed_path": "seed",
                "service": "raft_simple",
                "data_dir": "data",
                "cluster": {{ "members": [{{
                    "node_id": "{}",
                    "raft_addr": "127.0.0.1:10020",
                    "notary_addr": "127.0.0.1:10010"
                }}] }}
            }}"#,
            String::from(NodeId::from_bytes([1; 32]))
        );
        std::fs::write(&path, json).unwrap();

        let cfg = NotaryConfig::load(&path).unwrap();
        assert_eq!(cfg.service, NotaryServiceType::RaftSimple);
        assert_eq!(cfg.time_tolerance(), Duration::from_secs(30));
        assert_eq!(cfg.raft, RaftConfig::default());
        assert_eq!(cfg.requester.max_attempts, constants::DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = NotaryConfig::load("/nonexistent/notary.json").unwrap_err();
        assert!(matches!(err, NotaryError::Configuration(_)));
    }
}
