//! Symmetric metadata encryption: gzip then AES-128-GCM.
//!
//! Encrypted section format (as persisted in the wire JSON):
//! ```text
//! ciphertext = base64( AES-128-GCM( gzip(plaintext) ) )   tag detached
//! nonce      = 16 random bytes (base64 in the wire JSON)
//! tag        = 16-byte GCM tag (base64 in the wire JSON)
//! ```
//!
//! Decryption requires the exact (key, nonce, tag) triple and fails closed
//! with no partial output. A gunzip failure after a successful tag check is
//! reported identically to a decrypt failure.

use std::io::{Read, Write};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes128;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;

use crate::key::MetadataKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// AES-128-GCM with the metadata format's 16-byte nonce.
type MetadataCipher = AesGcm<Aes128, U16>;
type MetadataNonce = aes_gcm::Nonce<U16>;

/// An encrypted metadata section: ciphertext (base64), nonce, detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext_b64: String,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Compress and encrypt a metadata section with a fresh random nonce.
pub fn encrypt_payload(key: &MetadataKey, plaintext: &[u8]) -> anyhow::Result<EncryptedPayload> {
    let compressed = gzip(plaintext)?;

    let mut nonce = vec![0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = MetadataCipher::new(key.as_bytes().into());
    let mut ciphertext = cipher
        .encrypt(MetadataNonce::from_slice(&nonce), compressed.as_slice())
        .map_err(|e| anyhow::anyhow!("metadata encryption failed: {e}"))?;

    // aes-gcm appends the tag; the wire format carries it detached.
    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

    Ok(EncryptedPayload {
        ciphertext_b64: BASE64.encode(&ciphertext),
        nonce,
        tag,
    })
}

/// Decrypt and decompress a metadata section. Fails closed: any tag
/// mismatch, malformed base64, or gunzip failure yields an error and no
/// plaintext.
pub fn decrypt_payload(key: &MetadataKey, payload: &EncryptedPayload) -> anyhow::Result<Vec<u8>> {
    if payload.nonce.len() != NONCE_SIZE {
        anyhow::bail!(
            "bad nonce size: {} bytes (expected {})",
            payload.nonce.len(),
            NONCE_SIZE
        );
    }
    if payload.tag.len() != TAG_SIZE {
        anyhow::bail!(
            "bad tag size: {} bytes (expected {})",
            payload.tag.len(),
            TAG_SIZE
        );
    }

    let mut ciphertext = BASE64
        .decode(&payload.ciphertext_b64)
        .map_err(|e| anyhow::anyhow!("ciphertext base64 decode: {e}"))?;
    ciphertext.extend_from_slice(&payload.tag);

    let cipher = MetadataCipher::new(key.as_bytes().into());
    let compressed = cipher
        .decrypt(MetadataNonce::from_slice(&payload.nonce), ciphertext.as_slice())
        .map_err(|_| anyhow::anyhow!("metadata decryption failed: invalid key, nonce, or tag"))?;

    gunzip(&compressed)
}

fn gzip(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| anyhow::anyhow!("gzip compression failed: {e}"))
}

fn gunzip(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| anyhow::anyhow!("gzip decompression failed: {e}"))?;
    Ok(out)
}
