//! Requester checkpoints.
//!
//! The requester persists its state before every suspension (awaiting a
//! reply, backing off) so a restarted process can resume the session with
//! the identical request instead of building a new one.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use notary_types::{NodeId, NotarisationRequest, Result, SessionId};
use serde::{Deserialize, Serialize};

/// Where a requester session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum RequesterStep {
    Start,
    /// Request sent to `member`, reply pending.
    AwaitingResponse { member: NodeId, attempt: u32 },
    /// Waiting before sending attempt `attempt` to `member`.
    BackingOff { member: NodeId, attempt: u32 },
}

/// Everything needed to resume a requester session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterCheckpoint {
    pub session_id: SessionId,
    pub request: NotarisationRequest,
    pub step: RequesterStep,
}

/// Durable home for requester checkpoints.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &RequesterCheckpoint) -> Result<()>;

    fn load(&self, session_id: SessionId) -> Result<Option<RequesterCheckpoint>>;

    fn remove(&self, session_id: SessionId) -> Result<()>;

    /// Sessions with a stored checkpoint.
    fn sessions(&self) -> Result<Vec<SessionId>>;
}

/// Keeps serialized checkpoints in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<SessionId, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &RequesterCheckpoint) -> Result<()> {
        let bytes = serde_json::to_vec(checkpoint)?;
        self.entries().insert(checkpoint.session_id, bytes);
        Ok(())
    }

    fn load(&self, session_id: SessionId) -> Result<Option<RequesterCheckpoint>> {
        self.entries()
            .get(&session_id)
            .map(|bytes| serde_json::from_slice(bytes).map_err(Into::into))
            .transpose()
    }

    fn remove(&self, session_id: SessionId) -> Result<()> {
        self.entries().remove(&session_id);
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<SessionId>> {
        Ok(self.entries().keys().copied().collect())
    }
}

/// One JSON file per session, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &RequesterCheckpoint) -> Result<()> {
        let path = self.path(checkpoint.session_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, session_id: SessionId) -> Result<Option<RequesterCheckpoint>> {
        let path = self.path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
    }

    fn remove(&self, session_id: SessionId) -> Result<()> {
        let path = self.path(session_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<SessionId>> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let checkpoint: RequesterCheckpoint = serde_json::from_slice(&fs::read(&path)?)?;
                sessions.push(checkpoint.session_id);
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use notary_types::{KeyPair, NotarisableTransaction, Party, SignedTransaction};

    use super::*;

    fn checkpoint() -> RequesterCheckpoint {
        let key = KeyPair::from_seed([1; 32]);
        let party = Party::new("Alice", key.public_key());
        let notary = Party::new("Notary", KeyPair::from_seed([2; 32]).public_key());
        let stx = SignedTransaction::new(NotarisableTransaction::dummy(Vec::new(), key.public_key(), notary));
        RequesterCheckpoint {
            session_id: SessionId::new(),
            request: NotarisationRequest::non_validating(&stx, party, &key),
            step: RequesterStep::BackingOff {
                member: NodeId::from_bytes([3; 32]),
                attempt: 2,
            },
        }
    }

    fn exercise(store: &dyn CheckpointStore) {
        let cp = checkpoint();
        assert!(store.load(cp.session_id).unwrap().is_none());
        store.save(&cp).unwrap();
        assert_eq!(store.load(cp.session_id).unwrap(), Some(cp.clone()));
        assert_eq!(store.sessions().unwrap(), vec![cp.session_id]);
        store.remove(cp.session_id).unwrap();
        assert!(store.load(cp.session_id).unwrap().is_none());
        assert!(store.sessions().unwrap().is_empty());
    }

    #[test]
    fn in_memory_store() {
        exercise(&InMemoryCheckpointStore::new());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileCheckpointStore::open(dir.path()).unwrap());

        let cp = checkpoint();
        FileCheckpointStore::open(dir.path()).unwrap().save(&cp).unwrap();
        let reopened = FileCheckpointStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load(cp.session_id).unwrap(), Some(cp));
    }
}
