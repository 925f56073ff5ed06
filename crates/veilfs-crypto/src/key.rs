//! The folder metadata key: 128-bit, random, zeroized on drop.

use rand::RngCore;
use zeroize::Zeroize;

use crate::METADATA_KEY_SIZE;

/// A 128-bit folder metadata key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct MetadataKey {
    bytes: [u8; METADATA_KEY_SIZE],
}

impl MetadataKey {
    pub fn from_bytes(bytes: [u8; METADATA_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, rejecting anything that is not exactly
    /// 16 bytes. Unwrapped key material goes through here so a truncated
    /// or padded decrypt result can never become a usable key.
    pub fn try_from_slice(slice: &[u8]) -> anyhow::Result<Self> {
        if slice.len() != METADATA_KEY_SIZE {
            anyhow::bail!(
                "metadata key has wrong size: {} bytes (expected {})",
                slice.len(),
                METADATA_KEY_SIZE
            );
        }
        let mut bytes = [0u8; METADATA_KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; METADATA_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MetadataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 128-bit metadata key.
pub fn generate_metadata_key() -> MetadataKey {
    let mut bytes = [0u8; METADATA_KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    MetadataKey::from_bytes(bytes)
}
