//! Identifiers used throughout the notary cluster.
//!
//! Transaction ids are SHA-256 content hashes. Node ids are the member's
//! raw ed25519 public key. Session ids use UUIDv7 for time-ordered sorting.
//!
//! Byte-array identifiers serialize as lowercase hex strings so they can be
//! used as JSON map keys and read comfortably in config files and logs.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{NotaryError, PublicKey, constants};

/// Decode a 64-character hex string into 32 bytes.
pub(crate) fn decode_hex32(s: &str) -> crate::Result<[u8; 32]> {
    let bytes = hex::decode(s).map_err(|e| NotaryError::Serialization(format!("bad hex: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        NotaryError::Serialization(format!("expected 32 bytes, got {}", b.len()))
    })
}

// ---------------------------------------------------------------------------
// TransactionId
// ---------------------------------------------------------------------------

/// Content hash of a transaction. Globally unique per distinct content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(pub [u8; 32]);

impl TransactionId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// `SHA-256(domain_sep || content)`.
    #[must_use]
    pub fn hash_of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(constants::TX_ID_DOMAIN);
        hasher.update(content);
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First four bytes in hex, for compact log fields.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.short())
    }
}

impl FromStr for TransactionId {
    type Err = NotaryError;

    fn from_str(s: &str) -> crate::Result<Self> {
        decode_hex32(s).map(Self)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = NotaryError;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// StateRef
// ---------------------------------------------------------------------------

/// Pointer to one output of a past transaction: `(txhash, index)`.
///
/// Consumable exactly once. Serializes as `"<txhash>:<index>"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateRef {
    /// The transaction that created the state.
    pub txhash: TransactionId,
    /// Position of the state in that transaction's outputs.
    pub index: u32,
}

impl StateRef {
    #[must_use]
    pub fn new(txhash: TransactionId, index: u32) -> Self {
        Self { txhash, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txhash, self.index)
    }
}

impl fmt::Debug for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateRef({}:{})", self.txhash.short(), self.index)
    }
}

impl FromStr for StateRef {
    type Err = NotaryError;

    fn from_str(s: &str) -> crate::Result<Self> {
        let (hash, index) = s.split_once(':').ok_or_else(|| {
            NotaryError::Serialization(format!("state ref '{s}' is missing ':<index>'"))
        })?;
        let index = index
            .parse::<u32>()
            .map_err(|e| NotaryError::Serialization(format!("bad output index: {e}")))?;
        Ok(Self::new(hash.parse()?, index))
    }
}

impl TryFrom<String> for StateRef {
    type Error = NotaryError;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<StateRef> for String {
    fn from(r: StateRef) -> Self {
        r.to_string()
    }
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Identity of a notary cluster member.
/// This is the raw ed25519 public key (32 bytes) the member signs with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn from_key(key: PublicKey) -> Self {
        Self(key.0)
    }

    /// The public key this member signs attestations with.
    #[must_use]
    pub fn key(&self) -> PublicKey {
        PublicKey(self.0)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl FromStr for NodeId {
    type Err = NotaryError;

    fn from_str(s: &str) -> crate::Result<Self> {
        decode_hex32(s).map(Self)
    }
}

impl TryFrom<String> for NodeId {
    type Error = NotaryError;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        hex::encode(id.0)
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Identifies one notarisation session between a requester and the cluster.
/// Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
