//! Identity and signature verification collaborators.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use notary_types::{DigitalSignature, NotaryError, Party, PublicKey, Result};

/// Validates that a signature was made by a known party.
pub trait IdentityService: Send + Sync {
    /// Verify `signature` over `message` as coming from `party`.
    fn verify(&self, party: &Party, message: &[u8], signature: &DigitalSignature) -> Result<()>;
}

/// Trusts any party whose owning key made the signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenIdentityService;

impl IdentityService for OpenIdentityService {
    fn verify(&self, party: &Party, message: &[u8], signature: &DigitalSignature) -> Result<()> {
        if signature.by != party.owning_key {
            return Err(NotaryError::InvalidSignature {
                reason: format!("signature by {} does not belong to {}", signature.by, party.name),
            });
        }
        signature.verify(message)
    }
}

/// Registry of well-known parties. Unregistered names are refused.
#[derive(Debug, Default)]
pub struct InMemoryIdentityService {
    parties: RwLock<HashMap<String, PublicKey>>,
}

impl InMemoryIdentityService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, party: &Party) {
        self.parties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(party.name.clone(), party.owning_key);
    }

    #[must_use]
    pub fn well_known_key(&self, name: &str) -> Option<PublicKey> {
        self.parties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

impl IdentityService for InMemoryIdentityService {
    fn verify(&self, party: &Party, message: &[u8], signature: &DigitalSignature) -> Result<()> {
        match self.well_known_key(&party.name) {
            None => Err(NotaryError::InvalidSignature {
                reason: format!("unknown party {}", party.name),
            }),
            Some(key) if key != party.owning_key => Err(NotaryError::InvalidSignature {
                reason: format!("{} is registered with key {key}", party.name),
            }),
            Some(_) => OpenIdentityService.verify(party, message, signature),
        }
    }
}
