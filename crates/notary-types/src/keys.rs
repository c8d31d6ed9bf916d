//! Keys, signatures, and party identities.
//!
//! Thin wrappers over `ed25519-dalek` so the rest of the workspace deals in
//! plain byte newtypes that serialize as hex.

use std::{fmt, str::FromStr};

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{NotaryError, Result, ids::decode_hex32};

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Raw ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Verify `signature` over `message` with this key.
    ///
    /// # Errors
    /// Returns [`NotaryError::InvalidSignature`] if the key is not a valid
    /// curve point or the signature does not verify.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|e| NotaryError::InvalidSignature {
            reason: format!("bad public key {self}: {e}"),
        })?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|e| NotaryError::InvalidSignature {
                reason: format!("signature by {self} did not verify: {e}"),
            })
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..4]))
    }
}

impl FromStr for PublicKey {
    type Err = NotaryError;

    fn from_str(s: &str) -> Result<Self> {
        decode_hex32(s).map(Self)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = NotaryError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        hex::encode(key.0)
    }
}

// ---------------------------------------------------------------------------
// SignatureBytes / DigitalSignature
// ---------------------------------------------------------------------------

/// Raw 64-byte ed25519 signature.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignatureBytes(pub [u8; 64]);

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({}..)", hex::encode(&self.0[..4]))
    }
}

impl TryFrom<String> for SignatureBytes {
    type Error = NotaryError;

    fn try_from(value: String) -> Result<Self> {
        let bytes = hex::decode(&value)
            .map_err(|e| NotaryError::Serialization(format!("bad signature hex: {e}")))?;
        let bytes: [u8; 64] = bytes.try_into().map_err(|b: Vec<u8>| {
            NotaryError::Serialization(format!("expected 64 signature bytes, got {}", b.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl From<SignatureBytes> for String {
    fn from(sig: SignatureBytes) -> Self {
        hex::encode(sig.0)
    }
}

/// A signature together with the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigitalSignature {
    /// Key that signed.
    pub by: PublicKey,
    /// Signature bytes.
    pub bytes: SignatureBytes,
}

impl DigitalSignature {
    /// Verify this signature over `message` against its own `by` key.
    ///
    /// # Errors
    /// Returns [`NotaryError::InvalidSignature`] if verification fails.
    pub fn verify(&self, message: &[u8]) -> Result<()> {
        self.by.verify(message, &self.bytes)
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// An ed25519 signing key. Never serialized; load it from a seed.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Derive a key pair from a 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a key pair from a 64-character hex seed.
    ///
    /// # Errors
    /// Returns [`NotaryError::Serialization`] if the seed is not 32 hex bytes.
    pub fn from_hex_seed(seed: &str) -> Result<Self> {
        decode_hex32(seed.trim()).map(Self::from_seed)
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    #[must_use]
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature {
            by: self.public_key(),
            bytes: SignatureBytes(self.signing.sign(message).to_bytes()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Random key pairs for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl KeyPair {
    #[must_use]
    pub fn random() -> Self {
        Self::from_seed(rand::random::<[u8; 32]>())
    }
}

// ---------------------------------------------------------------------------
// Party
// ---------------------------------------------------------------------------

/// A well-known legal identity with the key it signs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Party {
    /// Human-readable legal name.
    pub name: String,
    /// Key the party signs transactions and requests with.
    pub owning_key: PublicKey,
}

impl Party {
    #[must_use]
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.owning_key)
    }
}
