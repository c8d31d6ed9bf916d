//! Signing seed files: 64 hex characters, optional trailing newline.

use std::{fs, path::Path};

use notary_types::{KeyPair, NodeId, NotaryError, Result};

/// Read the member key from `path`.
pub fn load_key(path: &Path) -> Result<KeyPair> {
    let seed = fs::read_to_string(path).map_err(|e| {
        NotaryError::Configuration(format!("cannot read key seed {}: {e}", path.display()))
    })?;
    KeyPair::from_hex_seed(seed.trim())
        .map_err(|e| NotaryError::Configuration(format!("bad key seed in {}: {e}", path.display())))
}

/// Write a fresh random seed to `path`, refusing to overwrite, and return
/// the node id it yields.
pub fn generate_key(path: &Path) -> Result<NodeId> {
    if path.exists() {
        return Err(NotaryError::Configuration(format!(
            "{} already exists; refusing to overwrite a key",
            path.display()
        )));
    }
    let seed: [u8; 32] = rand::random();
    fs::write(path, format!("{}\n", hex::encode(seed)))?;
    let key = KeyPair::from_seed(seed);
    Ok(NodeId::from_key(key.public_key()))
}
