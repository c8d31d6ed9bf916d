//! Raft RPC messages.
//!
//! Requests and responses are all one-way messages; a response is simply a
//! message travelling the other way. Heartbeats are `AppendEntries` with an
//! empty entry list.

use notary_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::log::{LogEntry, LogIndex, Term};

/// `RequestVote(term, candidateId, lastLogIndex, lastLogTerm)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Reply to [`RequestVote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub granted: bool,
}

/// `AppendEntries(term, leaderId, prevLogIndex, prevLogTerm, entries[], leaderCommit)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries<C> {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry<C>>,
    pub leader_commit: LogIndex,
}

/// Reply to [`AppendEntries`].
///
/// On success `match_index` is the last index known to match the leader.
/// On failure it is a hint: the follower's log is known not to match
/// beyond it, so the leader can back off in one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
}

/// Any message exchanged between cluster members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rpc", rename_all = "snake_case")]
pub enum RaftMessage<C> {
    RequestVote(RequestVote),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntries<C>),
    AppendResponse(AppendResponse),
}

impl<C> RaftMessage<C> {
    /// Term carried by the message.
    #[must_use]
    pub fn term(&self) -> Term {
        match self {
            Self::RequestVote(m) => m.term,
            Self::VoteResponse(m) => m.term,
            Self::AppendEntries(m) => m.term,
            Self::AppendResponse(m) => m.term,
        }
    }

    /// Short name for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestVote(_) => "request_vote",
            Self::VoteResponse(_) => "vote_response",
            Self::AppendEntries(m) if m.entries.is_empty() => "heartbeat",
            Self::AppendEntries(_) => "append_entries",
            Self::AppendResponse(_) => "append_response",
        }
    }
}

/// A message together with its sender, as framed on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftEnvelope<C> {
    pub from: NodeId,
    pub message: RaftMessage<C>,
}
