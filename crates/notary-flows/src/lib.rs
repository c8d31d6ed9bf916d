//! # notary-flows
//!
//! The two ends of a notarisation.
//!
//! - [`NotaryService`] runs on every cluster member. It checks the request's
//!   time window against the local clock, optionally validates the full
//!   transaction, commits the inputs through a [`UniquenessProvider`] and
//!   signs the transaction id when the commit succeeds.
//! - [`NotarisationRequester`] runs on the client. It sends the request to a
//!   member, follows leader redirects, times out and rotates through the
//!   members, and checks the returned signature. Its progress is kept in a
//!   [`CheckpointStore`] so a session can be resumed.
//!
//! Requester and members talk through a [`NotaryChannel`]:
//! [`LocalNotaryNetwork`] in process, [`TcpNotaryChannel`] over the wire.
//!
//! [`UniquenessProvider`]: notary_uniqueness::UniquenessProvider

pub mod checkpoint;
pub mod identity;
pub mod requester;
pub mod server;
pub mod session;
pub mod tcp;
pub mod time_window;
pub mod verifier;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, RequesterCheckpoint, RequesterStep};
pub use identity::{IdentityService, InMemoryIdentityService, OpenIdentityService};
pub use requester::NotarisationRequester;
pub use server::{FlowOutcome, NotaryFlow, NotaryFlowStep, NotaryService};
pub use session::{LinkMode, LocalNotaryNetwork, NotaryChannel, SessionRequest, SessionResponse};
pub use tcp::{TcpNotaryChannel, serve_notary};
pub use time_window::{TimeWindowChecker, is_valid_at};
pub use verifier::{NoContractVerifier, TransactionVerifier};
