use notary_types::{Result, SignedTransaction};

/// Contract-level verification used by validating notaries.
///
/// The notary itself checks ids, input distinctness and signatures; this
/// hook covers whatever the ledger's contract logic demands on top.
pub trait TransactionVerifier: Send + Sync {
    fn verify(&self, stx: &SignedTransaction) -> Result<()>;
}

/// Accepts every structurally valid transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContractVerifier;

impl TransactionVerifier for NoContractVerifier {
    fn verify(&self, _stx: &SignedTransaction) -> Result<()> {
        Ok(())
    }
}
