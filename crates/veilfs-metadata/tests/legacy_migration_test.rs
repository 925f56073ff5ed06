//! Integration tests for reading V1-era documents and migrating them.
//!
//! A V1 document carries generation-indexed RSA-wrapped keys and a flat
//! file map; V1.2 replaced the numbered keys with a single `metadataKey`
//! field. Reading either must succeed silently; a bridged legacy key flags
//! the document so its next upload comes out as V2.

mod common;

use serde_json::json;

use common::{alice, b64, ALICE_PUB};
use veilfs_core::MetadataError;
use veilfs_crypto::{generate_metadata_key, wrap_with_public_key_pem, MetadataKey};
use veilfs_metadata::{FolderMetadata, SchemaVersion};

fn wrapped_b64(key: &MetadataKey) -> String {
    b64(&wrap_with_public_key_pem(ALICE_PUB, key).unwrap())
}

fn v1_files() -> serde_json::Value {
    json!({
        "f1.enc": {
            "filename": "notes.txt",
            "key": b64(&[0x77; 32]),
            "mimetype": "text/plain",
            "initializationVector": b64(&[0x88; 16]),
            "authenticationTag": b64(&[0x99; 16]),
        },
    })
}

#[test]
fn numbered_keys_decode_with_the_newest_generation() {
    let stale = generate_metadata_key();
    let current = generate_metadata_key();
    let raw = json!({
        "metadata": {
            "metadataKeys": {
                "0": wrapped_b64(&stale),
                "2": wrapped_b64(&current),
            },
            "version": 1,
        },
        "files": v1_files(),
    })
    .to_string()
    .into_bytes();

    let mut doc = FolderMetadata::new(alice(), "/enc", "/enc");
    doc.setup(Some(&raw)).unwrap();

    assert_eq!(doc.version_from_metadata(), SchemaVersion::V1);
    assert_eq!(doc.metadata_key().unwrap().as_bytes(), current.as_bytes());
    assert_eq!(doc.files().len(), 1);
    assert_eq!(doc.files()[0].original_filename, "notes.txt");
    // Bridged below the required version: migration is pending.
    assert!(doc.encrypted_metadata_need_update());
}

#[test]
fn single_metadata_key_field_takes_precedence() {
    let numbered = generate_metadata_key();
    let single = generate_metadata_key();
    let raw = json!({
        "metadata": {
            "metadataKey": wrapped_b64(&single),
            "metadataKeys": {"0": wrapped_b64(&numbered)},
            "version": 1.2,
        },
        "files": v1_files(),
    })
    .to_string()
    .into_bytes();

    let mut doc = FolderMetadata::new(alice(), "/enc", "/enc");
    doc.setup(Some(&raw)).unwrap();

    assert_eq!(doc.version_from_metadata(), SchemaVersion::V1_2);
    assert_eq!(doc.metadata_key().unwrap().as_bytes(), single.as_bytes());
    assert!(!doc.encrypted_metadata_need_update());
}

#[test]
fn undecryptable_keys_fail_closed() {
    let raw = json!({
        "metadata": {
            "metadataKeys": {"0": b64(&[0u8; 256])},
            "version": 1,
        },
        "files": v1_files(),
    })
    .to_string()
    .into_bytes();

    let mut doc = FolderMetadata::new(alice(), "/enc", "/enc");
    let err = doc.setup(Some(&raw)).unwrap_err();
    assert!(matches!(err, MetadataError::CryptoFailure(_)));
    assert!(!doc.is_metadata_setup());
    assert!(doc.files().is_empty());
}

#[test]
fn flagged_document_reencodes_as_v2() {
    let key = generate_metadata_key();
    let raw = json!({
        "metadata": {
            "metadataKeys": {"0": wrapped_b64(&key)},
            "version": 1,
        },
        "files": v1_files(),
    })
    .to_string()
    .into_bytes();

    let mut doc = FolderMetadata::new(alice(), "/enc", "/enc");
    doc.setup(Some(&raw)).unwrap();
    assert!(doc.encrypted_metadata_need_update());

    let migrated = doc.encrypted_metadata().unwrap();
    assert_eq!(doc.version_from_metadata(), SchemaVersion::V2);
    assert!(!doc.encrypted_metadata_need_update());

    // Migration rotated the key; the old V1 key must no longer be current.
    assert_ne!(doc.metadata_key().unwrap().as_bytes(), key.as_bytes());

    // The migrated upload is a self-contained V2 document: the owner's
    // wrapped key, the rotated checksum, and the files carried over.
    let mut reader = FolderMetadata::new(alice(), "/enc", "/enc");
    reader.setup(Some(&migrated)).unwrap();
    assert_eq!(reader.version_from_metadata(), SchemaVersion::V2);
    assert!(reader.folder_users().contains_key("alice"));
    assert_eq!(reader.files().len(), 1);
    assert_eq!(reader.files()[0].original_filename, "notes.txt");
    assert_eq!(reader.key_checksums().len(), 1);
}

#[test]
fn unflagged_v1_document_stays_v1() {
    let key = generate_metadata_key();
    let raw = json!({
        "metadata": {
            "metadataKey": wrapped_b64(&key),
            "version": 1,
        },
        "files": v1_files(),
    })
    .to_string()
    .into_bytes();

    let mut doc = FolderMetadata::new(alice(), "/enc", "/enc");
    doc.setup(Some(&raw)).unwrap();
    assert_eq!(doc.version_from_metadata(), SchemaVersion::V1);
    assert!(!doc.encrypted_metadata_need_update());

    let reencoded = doc.encrypted_metadata().unwrap();
    assert_eq!(doc.version_from_metadata(), SchemaVersion::V1);

    let parsed: serde_json::Value = serde_json::from_slice(&reencoded).unwrap();
    assert_eq!(parsed["metadata"]["version"], json!(1));
    assert!(parsed["metadata"]["metadataKeys"]["0"].is_string());
    assert_eq!(parsed["files"]["f1.enc"]["filename"], json!("notes.txt"));
}

#[test]
fn absent_version_token_is_read_as_oldest_and_flagged() {
    let key = generate_metadata_key();
    let raw = json!({
        "metadata": {
            "metadataKeys": {"0": wrapped_b64(&key)},
        },
        "files": v1_files(),
    })
    .to_string()
    .into_bytes();

    let mut doc = FolderMetadata::new(alice(), "/enc", "/enc");
    doc.setup(Some(&raw)).unwrap();
    assert_eq!(doc.version_from_metadata(), SchemaVersion::V1);
    assert!(doc.encrypted_metadata_need_update());
}
