//! Schema-upgrade bookkeeping during decode.
//!
//! Migration is one-directional: a document read below the required
//! version (or accepted under the checksum override) is flagged and must
//! re-encode itself as V2 on its next upload. Nothing here ever downgrades.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use veilfs_core::Account;
use veilfs_crypto::{metadata_key_checksum, unwrap_metadata_key, MetadataKey};

use crate::document::base64_decode;

/// Unwrap the most recent generation-indexed legacy key as a bridging key.
///
/// Called when a V1-era document carries no single `metadataKey` field.
/// Returns the generation index and the key, or `None` when no entry
/// decrypts with the account's private key.
pub(crate) fn bridge_legacy_key(
    account: &Account,
    numbered_keys: &BTreeMap<String, String>,
) -> Option<(u32, MetadataKey)> {
    // Highest generation first. Indices are numeric strings on the wire.
    let mut generations: Vec<(u32, &String)> = numbered_keys
        .iter()
        .filter_map(|(index, value)| index.parse::<u32>().ok().map(|i| (i, value)))
        .collect();
    generations.sort_by(|a, b| b.0.cmp(&a.0));

    for (index, wrapped_b64) in generations {
        let Ok(wrapped) = base64_decode(wrapped_b64) else {
            warn!(index, "legacy metadata key is not valid base64");
            continue;
        };
        match unwrap_metadata_key(&account.private_key_pem, &wrapped) {
            Ok(key) => {
                debug!(index, "bridging metadata key from legacy generation");
                return Some((index, key));
            }
            Err(e) => {
                debug!(index, error = %e, "legacy metadata key did not unwrap");
            }
        }
    }
    None
}

/// Outcome of checking a resolved metadata key against a checksum set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChecksumDecision {
    /// Digest present in the set.
    Valid,
    /// Empty set: nothing to verify against yet, decode proceeds.
    NotYetVerifiable,
    /// Digest absent but the account's override flag is set; decode
    /// proceeds flagged for re-encryption.
    OverrideAccepted,
    /// Digest absent, no override: decode must fail.
    Mismatch,
}

pub(crate) fn verify_resolved_key(
    account: &Account,
    checksums: &BTreeSet<String>,
    key: &MetadataKey,
) -> ChecksumDecision {
    if checksums.is_empty() {
        return ChecksumDecision::NotYetVerifiable;
    }
    let digest = metadata_key_checksum(&account.mnemonic_stripped(), key);
    if checksums.contains(&digest) {
        ChecksumDecision::Valid
    } else if account.skip_checksum_validation {
        warn!("metadata key checksum mismatch accepted via override; re-encryption scheduled");
        ChecksumDecision::OverrideAccepted
    } else {
        ChecksumDecision::Mismatch
    }
}
