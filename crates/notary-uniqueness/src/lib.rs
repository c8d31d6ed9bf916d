//! # notary-uniqueness
//!
//! The commit decision of the notary: given a transaction id and the states
//! it consumes, atomically record the consumption or report who got there
//! first.
//!
//! - [`UniquenessProvider`]: the contract both implementations satisfy.
//! - [`InMemoryUniquenessProvider`]: one process, one mutex.
//! - [`RaftUniquenessProvider`]: the record is a replicated state machine
//!   driven by `notary-raft`; every member applies the same commits in the
//!   same order.

pub mod memory;
pub mod provider;
pub mod raft;
pub mod record;

pub use memory::InMemoryUniquenessProvider;
pub use provider::UniquenessProvider;
pub use raft::{CommitLog, ConsumptionStateMachine, RaftUniquenessProvider};
pub use record::{ConsumptionEntry, ConsumptionRecord};
