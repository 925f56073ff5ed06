//! veilfs-crypto: cryptographic primitives for E2EE folder metadata
//!
//! Wire-format mandated algorithms:
//!
//! ```text
//! Metadata key (128-bit random, per folder hierarchy)
//!   ├── metadata / filedrop sections: gzip → AES-128-GCM
//!   │     (16-byte random nonce, detached 16-byte tag, base64 at rest)
//!   ├── per-user wrapping: RSA-OAEP-SHA256 under the user's certificate
//!   └── key checksum: SHA-256(mnemonic without spaces ‖ key), hex
//! ```

pub mod aead;
pub mod checksum;
pub mod key;
pub mod wrap;

pub use aead::{decrypt_payload, encrypt_payload, EncryptedPayload};
pub use checksum::metadata_key_checksum;
pub use key::{generate_metadata_key, MetadataKey};
pub use wrap::{
    public_key_from_certificate_pem, unwrap_metadata_key, wrap_metadata_key,
    wrap_with_public_key_pem,
};

/// Size of a folder metadata key in bytes (AES-128)
pub const METADATA_KEY_SIZE: usize = 16;

/// Size of an AES-GCM nonce as used by the metadata format
pub const NONCE_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
