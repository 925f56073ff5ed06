//! Key checksums: binding a metadata-key generation to the account's
//! recovery phrase.
//!
//! The top-level folder's metadata carries a set of SHA-256 hex digests,
//! one per live key generation. A descendant folder checks its resolved
//! key against this set to detect key substitution by the server.

use sha2::{Digest, Sha256};

use crate::key::MetadataKey;

/// Compute the checksum for one key generation: SHA-256 over the recovery
/// phrase with spaces stripped, followed by the 16 key bytes. Lowercase hex.
pub fn metadata_key_checksum(stripped_mnemonic: &str, key: &MetadataKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stripped_mnemonic.as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
