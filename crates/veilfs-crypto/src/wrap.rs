//! Asymmetric key wrapping: RSA-OAEP-SHA256 under a user's certificate.
//!
//! Each folder user's entry carries the metadata key encrypted to that
//! user's public key; only the matching private key can unwrap it. Used
//! once per folder user per key rotation.

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use x509_cert::der::referenced::OwnedToRef;
use x509_cert::der::DecodePem;
use x509_cert::Certificate;

use crate::key::MetadataKey;

/// Extract the RSA public key from an X.509 certificate in PEM form.
pub fn public_key_from_certificate_pem(cert_pem: &str) -> anyhow::Result<RsaPublicKey> {
    let certificate = Certificate::from_pem(cert_pem.as_bytes())
        .map_err(|e| anyhow::anyhow!("certificate parse failed: {e}"))?;
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .owned_to_ref();
    RsaPublicKey::try_from(spki)
        .map_err(|e| anyhow::anyhow!("certificate does not carry an RSA key: {e}"))
}

/// Wrap a metadata key under a recipient's certificate.
pub fn wrap_metadata_key(cert_pem: &str, key: &MetadataKey) -> anyhow::Result<Vec<u8>> {
    let public_key = public_key_from_certificate_pem(cert_pem)?;
    wrap_with_key(&public_key, key)
}

/// Wrap a metadata key under a bare public key in PEM (SPKI) form.
pub fn wrap_with_public_key_pem(public_key_pem: &str, key: &MetadataKey) -> anyhow::Result<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| anyhow::anyhow!("public key parse failed: {e}"))?;
    wrap_with_key(&public_key, key)
}

fn wrap_with_key(public_key: &RsaPublicKey, key: &MetadataKey) -> anyhow::Result<Vec<u8>> {
    public_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| anyhow::anyhow!("key wrapping failed: {e}"))
}

/// Unwrap a metadata key with the holder's private key (PKCS#8 or PKCS#1
/// PEM). Anything that does not decrypt to exactly 16 bytes is rejected.
pub fn unwrap_metadata_key(private_key_pem: &str, wrapped: &[u8]) -> anyhow::Result<MetadataKey> {
    let private_key = parse_private_key_pem(private_key_pem)?;
    let plaintext = private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| anyhow::anyhow!("key unwrapping failed: wrong private key or corrupted data"))?;
    MetadataKey::try_from_slice(&plaintext)
}

fn parse_private_key_pem(pem: &str) -> anyhow::Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| anyhow::anyhow!("private key parse failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_metadata_key;

    const ALICE_KEY: &str = include_str!("../testdata/alice_key.pem");
    const ALICE_CERT: &str = include_str!("../testdata/alice_cert.pem");
    const ALICE_PUB: &str = include_str!("../testdata/alice_pub.pem");
    const BOB_KEY: &str = include_str!("../testdata/bob_key.pem");
    const BOB_CERT: &str = include_str!("../testdata/bob_cert.pem");

    #[test]
    fn test_wrap_unwrap_via_certificate() {
        let key = generate_metadata_key();

        let wrapped = wrap_metadata_key(ALICE_CERT, &key).unwrap();
        let unwrapped = unwrap_metadata_key(ALICE_KEY, &wrapped).unwrap();

        assert_eq!(key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_wrap_unwrap_via_public_key_pem() {
        let key = generate_metadata_key();

        let wrapped = wrap_with_public_key_pem(ALICE_PUB, &key).unwrap();
        let unwrapped = unwrap_metadata_key(ALICE_KEY, &wrapped).unwrap();

        assert_eq!(key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_unwrap_with_wrong_private_key_fails() {
        let key = generate_metadata_key();

        let wrapped = wrap_metadata_key(ALICE_CERT, &key).unwrap();
        assert!(unwrap_metadata_key(BOB_KEY, &wrapped).is_err());
    }

    #[test]
    fn test_wrap_is_randomized() {
        // OAEP padding must differ per invocation.
        let key = generate_metadata_key();
        let a = wrap_metadata_key(BOB_CERT, &key).unwrap();
        let b = wrap_metadata_key(BOB_CERT, &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        assert!(public_key_from_certificate_pem("not a pem").is_err());
        assert!(public_key_from_certificate_pem("").is_err());
    }

    #[test]
    fn test_corrupted_wrapped_key_fails() {
        let key = generate_metadata_key();
        let mut wrapped = wrap_metadata_key(ALICE_CERT, &key).unwrap();
        wrapped[0] ^= 0xFF;
        assert!(unwrap_metadata_key(ALICE_KEY, &wrapped).is_err());
    }
}
