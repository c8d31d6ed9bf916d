//! # notary-types
//!
//! Shared types, errors, and configuration for the **notary cluster**, the
//! double-spend prevention service of the ledger.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`TransactionId`], [`StateRef`], [`NodeId`], [`SessionId`]
//! - **Keys & signatures**: [`PublicKey`], [`KeyPair`], [`DigitalSignature`], [`Party`]
//! - **Time model**: [`TimeWindow`], injectable [`Clock`] sources
//! - **Transaction model**: [`NotarisableTransaction`], [`SignedTransaction`]
//! - **Commit model**: [`CommitRequest`], [`CommitOutcome`], [`Conflict`], [`ConsumingTx`]
//! - **Wire model**: [`NotarisationRequest`], [`NotarisationResponse`], [`RejectionReason`]
//! - **Configuration**: [`NotaryConfig`], [`ClusterConfig`], [`RaftConfig`], [`RequesterConfig`]
//! - **Errors**: [`NotaryError`] with `NT_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod clock;
pub mod commit;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod keys;
pub mod request;
pub mod time_window;
pub mod transaction;

pub use clock::*;
pub use commit::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use keys::*;
pub use request::*;
pub use time_window::*;
pub use transaction::*;

// Constants are accessed via `notary_types::constants::FOO`
// (not re-exported to avoid name collisions).
