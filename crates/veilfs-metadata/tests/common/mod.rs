//! Shared fixtures for metadata integration tests.

// Each test target compiles its own copy; not every target uses every item.
#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::SecretString;
use veilfs_core::Account;

pub const ALICE_KEY: &str = include_str!("../../testdata/alice_key.pem");
pub const ALICE_CERT: &str = include_str!("../../testdata/alice_cert.pem");
pub const ALICE_PUB: &str = include_str!("../../testdata/alice_pub.pem");
pub const BOB_CERT: &str = include_str!("../../testdata/bob_cert.pem");

pub const MNEMONIC: &str = "orbit lunar pine cedar maple oak";

pub fn alice() -> Arc<Account> {
    alice_with_override(false)
}

pub fn alice_with_override(skip_checksum_validation: bool) -> Arc<Account> {
    Arc::new(Account {
        user_id: "alice".into(),
        display_name: "Alice".into(),
        certificate_pem: ALICE_CERT.into(),
        public_key_pem: ALICE_PUB.into(),
        private_key_pem: ALICE_KEY.into(),
        mnemonic: SecretString::from(MNEMONIC),
        skip_checksum_validation,
    })
}

pub fn b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}
