//! Account context: identity and key material for metadata operations.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Everything the metadata layer needs to know about the acting account.
///
/// Key material is held as PEM; parsing happens in veilfs-crypto at the
/// point of use. The recovery mnemonic feeds the key-checksum computation
/// and is kept behind `secrecy` so it never lands in logs or Debug output.
#[derive(Clone, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub display_name: String,
    /// X.509 certificate, PEM.
    pub certificate_pem: String,
    /// Public key, PEM (SubjectPublicKeyInfo).
    pub public_key_pem: String,
    /// Private key, PEM (PKCS#8 or PKCS#1).
    pub private_key_pem: String,
    /// Recovery phrase backing the key-checksum scheme.
    pub mnemonic: SecretString,
    /// When set, a checksum mismatch downgrades from a hard decode failure
    /// to "accept once, re-encrypt on next upload".
    #[serde(default)]
    pub skip_checksum_validation: bool,
}

impl Account {
    /// Recovery phrase with spaces stripped, as fed into key checksums.
    pub fn mnemonic_stripped(&self) -> String {
        self.mnemonic.expose_secret().replace(' ', "")
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("mnemonic", &"[REDACTED]")
            .field("skip_checksum_validation", &self.skip_checksum_validation)
            .finish()
    }
}
