//! Deterministic Raft core.
//!
//! [`RaftCore`] holds the protocol state of one member and reacts to
//! inputs (`start_election`, `propose`, `handle`, `heartbeat`) by mutating
//! its state and returning the messages to send. Time is an input: the
//! caller owns the timers and passes the current wall clock only for
//! stamping new entries.
//!
//! Safety rules enforced here:
//! - at most one vote per term, persisted before the reply leaves;
//! - votes only go to candidates whose log is at least as up to date;
//! - a leader only counts replicas for entries of its own term;
//! - a follower never truncates at or below its commit index.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    marker::PhantomData,
};

use chrono::{DateTime, Utc};
use notary_types::{NodeId, NotaryError, Result};
use serde::{Deserialize, Serialize};

use crate::{
    log::{Command, EntryPayload, LogEntry, LogIndex, Term},
    rpc::{AppendEntries, AppendResponse, RaftMessage, RequestVote, VoteResponse},
    storage::{HardState, LogStorage},
};

/// Role of a member within its current term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Candidate => write!(f, "candidate"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// A message addressed to one peer.
#[derive(Debug, Clone)]
pub struct Outbound<C> {
    pub to: NodeId,
    pub message: RaftMessage<C>,
}

/// Side effects requested by one step of the core.
#[derive(Debug)]
pub struct Ready<C> {
    pub messages: Vec<Outbound<C>>,
    /// Heard from a valid leader or granted a vote: restart the election
    /// countdown.
    pub reset_election_timer: bool,
}

impl<C> Default for Ready<C> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            reset_election_timer: false,
        }
    }
}

impl<C> Ready<C> {
    fn send(&mut self, to: NodeId, message: RaftMessage<C>) {
        self.messages.push(Outbound { to, message });
    }

    fn merge(&mut self, other: Ready<C>) {
        self.messages.extend(other.messages);
        self.reset_election_timer |= other.reset_election_timer;
    }
}

/// Protocol state of a single cluster member.
pub struct RaftCore<C, S> {
    id: NodeId,
    peers: Vec<NodeId>,
    quorum: usize,
    storage: S,

    // Persistent (mirrored in storage)
    term: Term,
    voted_for: Option<NodeId>,

    // Volatile
    role: Role,
    leader_id: Option<NodeId>,
    commit_index: LogIndex,
    last_applied: LogIndex,

    // Candidate
    votes: BTreeSet<NodeId>,

    // Leader
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,

    max_entries: usize,
    _command: PhantomData<C>,
}

impl<C: Command, S: LogStorage<C>> RaftCore<C, S> {
    /// Create a follower. `members` is the full cluster and may include `id`.
    pub fn new(id: NodeId, members: &[NodeId], storage: S, max_entries: usize) -> Self {
        let mut peers: Vec<NodeId> = members.iter().copied().filter(|m| *m != id).collect();
        peers.sort();
        peers.dedup();
        let quorum = (peers.len() + 1) / 2 + 1;
        let HardState {
            current_term,
            voted_for,
        } = storage.hard_state();

        Self {
            id,
            peers,
            quorum,
            storage,
            term: current_term,
            voted_for,
            role: Role::Follower,
            leader_id: None,
            commit_index: 0,
            last_applied: 0,
            votes: BTreeSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            max_entries: max_entries.max(1),
            _command: PhantomData,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn last_index(&self) -> LogIndex {
        self.storage.last_index()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The error a non-leader returns to proposers.
    pub fn not_leader_error(&self) -> NotaryError {
        match self.leader_id {
            Some(leader) => NotaryError::NotLeader {
                leader_hint: Some(leader),
            },
            None => NotaryError::NoLeader,
        }
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Election timeout fired: become a candidate for the next term.
    pub fn start_election(&mut self, now: DateTime<Utc>) -> Result<Ready<C>> {
        if self.role == Role::Leader {
            return Ok(Ready::default());
        }

        self.term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.persist()?;
        self.votes.clear();
        self.votes.insert(self.id);

        tracing::info!(
            node = %self.id,
            term = self.term,
            last_index = self.last_index(),
            "Starting election"
        );

        if self.votes.len() >= self.quorum {
            return self.become_leader(now);
        }

        let request = RequestVote {
            term: self.term,
            candidate_id: self.id,
            last_log_index: self.storage.last_index(),
            last_log_term: self.storage.last_term(),
        };
        let mut ready = Ready {
            reset_election_timer: true,
            ..Ready::default()
        };
        for peer in &self.peers {
            ready.send(*peer, RaftMessage::RequestVote(request.clone()));
        }
        Ok(ready)
    }

    /// Append a client command. Only the leader accepts proposals.
    ///
    /// Returns the index and term the command was placed at. The command is
    /// committed once the entry at that index carries that term and the
    /// commit index has reached it; the caller sends the entry out with
    /// [`RaftCore::broadcast_append`].
    pub fn propose(&mut self, command: C, now: DateTime<Utc>) -> Result<(LogIndex, Term)> {
        if self.role != Role::Leader {
            return Err(self.not_leader_error());
        }
        let index = self.append_local(EntryPayload::Command(command), now)?;
        self.advance_commit();
        Ok((index, self.term))
    }

    /// Heartbeat tick: replicate pending entries or send empty appends.
    pub fn heartbeat(&mut self) -> Ready<C> {
        if self.role != Role::Leader {
            return Ready::default();
        }
        self.broadcast_append()
    }

    /// Send every peer whatever it is missing.
    pub fn broadcast_append(&self) -> Ready<C> {
        let mut ready = Ready::default();
        if self.role != Role::Leader {
            return ready;
        }
        for peer in &self.peers {
            ready.send(*peer, self.append_for(*peer));
        }
        ready
    }

    /// Process a message from a peer.
    pub fn handle(&mut self, from: NodeId, message: RaftMessage<C>, now: DateTime<Utc>) -> Result<Ready<C>> {
        if !self.peers.contains(&from) {
            tracing::warn!(node = %self.id, from = %from, kind = message.kind(), "Message from non-member dropped");
            return Ok(Ready::default());
        }

        let mut ready = Ready::default();
        if message.term() > self.term {
            let was_leader = self.role == Role::Leader;
            self.step_down(message.term())?;
            ready.reset_election_timer |= was_leader;
        }

        let step = match message {
            RaftMessage::RequestVote(request) => self.on_request_vote(from, &request)?,
            RaftMessage::VoteResponse(response) => self.on_vote_response(from, &response, now)?,
            RaftMessage::AppendEntries(append) => self.on_append_entries(from, append)?,
            RaftMessage::AppendResponse(response) => self.on_append_response(from, &response),
        };
        ready.merge(step);
        Ok(ready)
    }

    /// Drain entries that are committed but not yet applied, in index order.
    pub fn take_committed(&mut self) -> Vec<LogEntry<C>> {
        if self.commit_index <= self.last_applied {
            return Vec::new();
        }
        let count = usize::try_from(self.commit_index - self.last_applied).unwrap_or(usize::MAX);
        let entries = self.storage.entries(self.last_applied + 1, count);
        self.last_applied += entries.len() as u64;
        entries
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn persist(&mut self) -> Result<()> {
        self.storage.save_hard_state(&HardState {
            current_term: self.term,
            voted_for: self.voted_for,
        })
    }

    fn step_down(&mut self, term: Term) -> Result<()> {
        if self.role != Role::Follower {
            tracing::info!(node = %self.id, old_term = self.term, new_term = term, role = %self.role, "Stepping down");
        }
        self.term = term;
        self.voted_for = None;
        self.role = Role::Follower;
        self.leader_id = None;
        self.votes.clear();
        self.persist()
    }

    fn become_leader(&mut self, now: DateTime<Utc>) -> Result<Ready<C>> {
        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        self.votes.clear();

        let next = self.storage.last_index() + 1;
        self.next_index = self.peers.iter().map(|p| (*p, next)).collect();
        self.match_index = self.peers.iter().map(|p| (*p, 0)).collect();

        // Entries from earlier terms only commit once an entry of this term
        // does, so open the term with a no-op.
        let index = self.append_local(EntryPayload::Noop, now)?;
        self.advance_commit();

        tracing::info!(
            node = %self.id,
            term = self.term,
            noop_index = index,
            peers = self.peers.len(),
            "Became leader"
        );

        Ok(self.broadcast_append())
    }

    fn append_local(&mut self, payload: EntryPayload<C>, now: DateTime<Utc>) -> Result<LogIndex> {
        let entry = LogEntry {
            index: self.storage.last_index() + 1,
            term: self.term,
            leader: self.id,
            proposed_at: now,
            payload,
        };
        let index = entry.index;
        self.storage.append(std::slice::from_ref(&entry))?;
        Ok(index)
    }

    fn append_for(&self, peer: NodeId) -> RaftMessage<C> {
        let last = self.storage.last_index();
        let next = self.next_index.get(&peer).copied().unwrap_or(last + 1).clamp(1, last + 1);
        let prev_log_index = next - 1;
        RaftMessage::AppendEntries(AppendEntries {
            term: self.term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term: self.storage.term_at(prev_log_index).unwrap_or(0),
            entries: self.storage.entries(next, self.max_entries),
            leader_commit: self.commit_index,
        })
    }

    /// Move the commit index to the highest current-term entry held by a
    /// quorum.
    fn advance_commit(&mut self) {
        if self.role != Role::Leader {
            return;
        }
        let last = self.storage.last_index();
        let mut candidate = last;
        while candidate > self.commit_index {
            if self.storage.term_at(candidate) == Some(self.term) {
                let replicas = 1 + self.match_index.values().filter(|m| **m >= candidate).count();
                if replicas >= self.quorum {
                    tracing::debug!(node = %self.id, from = self.commit_index, to = candidate, "Commit index advanced");
                    self.commit_index = candidate;
                    return;
                }
            } else {
                // Older terms sit below every current-term entry.
                return;
            }
            candidate -= 1;
        }
    }

    // -----------------------------------------------------------------------
    // RPC handlers
    // -----------------------------------------------------------------------

    fn on_request_vote(&mut self, from: NodeId, request: &RequestVote) -> Result<Ready<C>> {
        let mut ready = Ready::default();
        let log_ok = request.last_log_term > self.storage.last_term()
            || (request.last_log_term == self.storage.last_term()
                && request.last_log_index >= self.storage.last_index());
        let vote_free = self.voted_for.is_none_or(|v| v == request.candidate_id);
        let granted = request.term == self.term && vote_free && log_ok;

        if granted {
            self.voted_for = Some(request.candidate_id);
            self.persist()?;
            ready.reset_election_timer = true;
        }

        tracing::debug!(
            node = %self.id,
            candidate = %request.candidate_id,
            term = request.term,
            granted,
            log_ok,
            "Vote requested"
        );

        ready.send(
            from,
            RaftMessage::VoteResponse(VoteResponse {
                term: self.term,
                granted,
            }),
        );
        Ok(ready)
    }

    fn on_vote_response(&mut self, from: NodeId, response: &VoteResponse, now: DateTime<Utc>) -> Result<Ready<C>> {
        if self.role != Role::Candidate || response.term != self.term || !response.granted {
            return Ok(Ready::default());
        }
        self.votes.insert(from);
        if self.votes.len() >= self.quorum {
            return self.become_leader(now);
        }
        Ok(Ready::default())
    }

    fn on_append_entries(&mut self, from: NodeId, append: AppendEntries<C>) -> Result<Ready<C>> {
        let mut ready = Ready::default();

        if append.term < self.term {
            ready.send(
                from,
                RaftMessage::AppendResponse(AppendResponse {
                    term: self.term,
                    success: false,
                    match_index: 0,
                }),
            );
            return Ok(ready);
        }

        // Same term: a valid leader exists.
        if self.role != Role::Follower {
            tracing::info!(node = %self.id, term = self.term, leader = %append.leader_id, "Leader discovered");
            self.role = Role::Follower;
            self.votes.clear();
        }
        self.leader_id = Some(append.leader_id);
        ready.reset_election_timer = true;

        let reject = |ready: &mut Ready<C>, term: Term, hint: LogIndex| {
            ready.send(
                from,
                RaftMessage::AppendResponse(AppendResponse {
                    term,
                    success: false,
                    match_index: hint,
                }),
            );
        };

        match self.storage.term_at(append.prev_log_index) {
            None => {
                reject(&mut ready, self.term, self.storage.last_index());
                return Ok(ready);
            }
            Some(term) if term != append.prev_log_term => {
                let hint = append.prev_log_index.saturating_sub(1).min(self.storage.last_index());
                reject(&mut ready, self.term, hint);
                return Ok(ready);
            }
            Some(_) => {}
        }

        let last_new = append.prev_log_index + append.entries.len() as u64;
        let mut fresh = Vec::new();
        for entry in append.entries {
            match self.storage.term_at(entry.index) {
                Some(existing) if existing == entry.term && fresh.is_empty() => {}
                Some(_) if fresh.is_empty() => {
                    if entry.index <= self.commit_index {
                        return Err(NotaryError::LogInconsistency {
                            reason: format!(
                                "leader {} would overwrite committed index {} (commit {})",
                                append.leader_id, entry.index, self.commit_index
                            ),
                        });
                    }
                    self.storage.truncate_from(entry.index)?;
                    fresh.push(entry);
                }
                _ => fresh.push(entry),
            }
        }
        if !fresh.is_empty() {
            self.storage.append(&fresh)?;
        }

        if append.leader_commit > self.commit_index {
            let target = append.leader_commit.min(last_new);
            if target > self.commit_index {
                self.commit_index = target;
            }
        }

        ready.send(
            from,
            RaftMessage::AppendResponse(AppendResponse {
                term: self.term,
                success: true,
                match_index: last_new,
            }),
        );
        Ok(ready)
    }

    fn on_append_response(&mut self, from: NodeId, response: &AppendResponse) -> Ready<C> {
        let mut ready = Ready::default();
        if self.role != Role::Leader || response.term != self.term {
            return ready;
        }

        let last = self.storage.last_index();
        if response.success {
            let matched = self.match_index.entry(from).or_insert(0);
            *matched = (*matched).max(response.match_index.min(last));
            let matched = *matched;
            self.next_index.insert(from, matched + 1);
            self.advance_commit();
            if matched < last {
                ready.send(from, self.append_for(from));
            }
        } else {
            let next = self.next_index.get(&from).copied().unwrap_or(last + 1);
            let backed_off = next.saturating_sub(1).min(response.match_index + 1).max(1);
            self.next_index.insert(from, backed_off);
            tracing::debug!(node = %self.id, peer = %from, next_index = backed_off, "Follower log mismatch, backing off");
            ready.send(from, self.append_for(from));
        }
        ready
    }
}
