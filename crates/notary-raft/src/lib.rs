//! # notary-raft
//!
//! **Consensus Log**: the ordered, durable, replicated sequence of commit
//! intents that serializes every commit-affecting operation of the notary
//! cluster through a single leader.
//!
//! ## Architecture
//!
//! - [`RaftCore`]: deterministic Raft state machine. Messages in, messages
//!   out, no clocks and no I/O apart from its [`LogStorage`]. Unit-testable
//!   by stepping it by hand.
//! - [`RaftNode`]: tokio driver around the core. Owns election and
//!   heartbeat timers, routes messages through a [`RaftTransport`], applies
//!   committed entries to a [`StateMachine`] and wakes waiting proposers.
//! - [`LogStorage`]: [`MemoryLogStorage`] for tests, [`FileLogStorage`]
//!   (JSON lines + hard-state file) for deployments.
//! - Transports: [`LocalNetwork`] (in-process router with partitions) and
//!   [`TcpTransport`] (length-prefixed JSON frames).
//!
//! ## Roles
//!
//! ```text
//!            election timeout          majority of votes
//! ┌──────────┐ ─────────────▶ ┌───────────┐ ───────────▶ ┌────────┐
//! │ FOLLOWER │                │ CANDIDATE │              │ LEADER │
//! └──────────┘ ◀───────────── └───────────┘              └────────┘
//!       ▲        higher term                                  │
//!       └─────────────────────────────────────────────────────┘
//!                           higher term
//! ```

pub mod frame;
pub mod log;
pub mod node;
pub mod raft;
pub mod rpc;
pub mod storage;
pub mod tcp;
pub mod transport;

pub use crate::log::{Command, EntryMeta, EntryPayload, LogEntry, LogIndex, Term};
pub use crate::node::{RaftHandle, RaftNode, RaftStatus, StateMachine};
pub use crate::raft::{Outbound, RaftCore, Ready, Role};
pub use crate::rpc::{AppendEntries, AppendResponse, RaftEnvelope, RaftMessage, RequestVote, VoteResponse};
pub use crate::storage::{FileLogStorage, HardState, LogStorage, MemoryLogStorage};
pub use crate::tcp::{TcpTransport, serve_raft};
pub use crate::transport::{Inbox, LocalNetwork, RaftTransport};
