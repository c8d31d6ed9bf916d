//! The slice of the ledger transaction model the notary needs.
//!
//! Contract semantics are out of scope; outputs are opaque blobs tagged with
//! a contract name and an owner. What the notary relies on is that the
//! transaction id is a content hash, so a validating notary can recompute it
//! and check the required signatures against it.

use serde::{Deserialize, Serialize};

use crate::{DigitalSignature, NotaryError, Party, PublicKey, Result, StateRef, TimeWindow, TransactionId};

/// One output state of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputState {
    /// Name of the contract governing the state.
    pub contract: String,
    /// Current owner of the state.
    pub owner: PublicKey,
    /// Opaque contract-specific payload.
    pub data: Vec<u8>,
}

/// A transaction as submitted for notarisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarisableTransaction {
    /// States consumed by this transaction. Distinct, in declaration order.
    pub inputs: Vec<StateRef>,
    /// States created by this transaction.
    pub outputs: Vec<OutputState>,
    /// Keys whose signatures the transaction needs (excluding the notary).
    pub required_signers: Vec<PublicKey>,
    /// The notary (cluster) responsible for the inputs.
    pub notary: Party,
    /// Declared validity interval, if any.
    pub time_window: Option<TimeWindow>,
    /// Distinguishes otherwise-identical transactions (e.g. repeated issuances).
    pub salt: u64,
}

impl NotarisableTransaction {
    /// Canonical byte encoding hashed into the transaction id.
    ///
    /// Format: `len(inputs) || inputs || len(outputs) || outputs ||
    /// len(signers) || signers || notary || time_window || salt`
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(input.txhash.as_bytes());
            buf.extend_from_slice(&input.index.to_le_bytes());
        }
        buf.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&(output.contract.len() as u64).to_le_bytes());
            buf.extend_from_slice(output.contract.as_bytes());
            buf.extend_from_slice(&output.owner.0);
            buf.extend_from_slice(&(output.data.len() as u64).to_le_bytes());
            buf.extend_from_slice(&output.data);
        }
        buf.extend_from_slice(&(self.required_signers.len() as u64).to_le_bytes());
        for key in &self.required_signers {
            buf.extend_from_slice(&key.0);
        }
        buf.extend_from_slice(&(self.notary.name.len() as u64).to_le_bytes());
        buf.extend_from_slice(self.notary.name.as_bytes());
        buf.extend_from_slice(&self.notary.owning_key.0);
        match self.time_window {
            Some(window) => {
                buf.push(1);
                for bound in [window.from_time(), window.until_time()] {
                    match bound {
                        Some(t) => {
                            buf.push(1);
                            buf.extend_from_slice(&t.timestamp_micros().to_le_bytes());
                        }
                        None => buf.push(0),
                    }
                }
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.salt.to_le_bytes());
        buf
    }

    /// Content hash identifying this transaction.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        TransactionId::hash_of(&self.canonical_bytes())
    }

    /// Reference to output `index` of this transaction.
    #[must_use]
    pub fn output_ref(&self, index: u32) -> StateRef {
        StateRef::new(self.id(), index)
    }

    /// Check that no input is listed twice.
    ///
    /// # Errors
    /// Returns [`NotaryError::DuplicateInput`] naming the first repeat.
    pub fn check_distinct_inputs(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(*input) {
                return Err(NotaryError::DuplicateInput(*input));
            }
        }
        Ok(())
    }
}

/// A transaction with the signatures collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: NotarisableTransaction,
    pub signatures: Vec<DigitalSignature>,
}

impl SignedTransaction {
    #[must_use]
    pub fn new(tx: NotarisableTransaction) -> Self {
        Self {
            tx,
            signatures: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.tx.id()
    }

    /// Add a signature over the transaction id by `key`.
    pub fn sign_with(&mut self, key: &crate::KeyPair) {
        let sig = key.sign(self.id().as_bytes());
        self.signatures.push(sig);
    }

    /// Add an externally produced signature (e.g. the notary's).
    pub fn with_signature(mut self, signature: DigitalSignature) -> Self {
        self.signatures.push(signature);
        self
    }

    /// Verify every attached signature, and that every required signer
    /// other than those in `allowed_missing` has signed.
    ///
    /// # Errors
    /// Returns [`NotaryError::InvalidSignature`] if a signature fails or a
    /// required signer is missing.
    pub fn verify_signatures_except(&self, allowed_missing: &[PublicKey]) -> Result<()> {
        let id = self.id();
        for sig in &self.signatures {
            sig.verify(id.as_bytes())?;
        }
        let missing: Vec<String> = self
            .tx
            .required_signers
            .iter()
            .filter(|key| !allowed_missing.contains(key))
            .filter(|key| !self.signatures.iter().any(|s| s.by == **key))
            .map(ToString::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NotaryError::InvalidSignature {
                reason: format!("missing signatures from: {}", missing.join(", ")),
            })
        }
    }
}

/// Dummy transactions for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl NotarisableTransaction {
    /// A transaction consuming `inputs`, with one output owned by `owner`.
    pub fn dummy(inputs: Vec<StateRef>, owner: PublicKey, notary: Party) -> Self {
        Self {
            inputs,
            outputs: vec![OutputState {
                contract: "dummy".to_string(),
                owner,
                data: b"dummy-state".to_vec(),
            }],
            required_signers: vec![owner],
            notary,
            time_window: None,
            salt: rand::random::<u64>(),
        }
    }
}
