//! Entries of the replicated log.
//!
//! Entries are appended in strict index order (1-based; index 0 is the
//! empty-log sentinel with term 0). Only committed entries are applied, in
//! index order, exactly once per node.

use std::fmt;

use chrono::{DateTime, Utc};
use notary_types::NodeId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Raft term number.
pub type Term = u64;

/// Position in the replicated log.
pub type LogIndex = u64;

/// Anything that can travel through the log.
pub trait Command: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Command for T where T: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// What an entry carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "command", rename_all = "snake_case")]
pub enum EntryPayload<C> {
    /// Appended by a new leader to commit entries from earlier terms.
    Noop,
    /// A client command.
    Command(C),
}

/// One entry of the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry<C> {
    pub index: LogIndex,
    pub term: Term,
    /// Leader that appended the entry.
    pub leader: NodeId,
    /// Leader's clock when the entry was appended. Replicated so that every
    /// node applies the same timestamp.
    pub proposed_at: DateTime<Utc>,
    pub payload: EntryPayload<C>,
}

impl<C> LogEntry<C> {
    #[must_use]
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            index: self.index,
            term: self.term,
            leader: self.leader,
            proposed_at: self.proposed_at,
        }
    }
}

/// Position and provenance of an applied entry, handed to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub index: LogIndex,
    pub term: Term,
    pub leader: NodeId,
    pub proposed_at: DateTime<Utc>,
}
