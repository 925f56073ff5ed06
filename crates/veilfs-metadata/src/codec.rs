//! The versioned wire codec.
//!
//! Three formats coexist on the server. Field names are fixed for
//! compatibility:
//!
//! ```text
//! envelope (GET):  {"ocs":{"data":{"meta-data":"<inner JSON as string>"}}}
//! inner V1/V1.2:   {"metadata":{"metadataKeys":{...},"metadataKey":...,
//!                   "version":1}, "files":{...}}
//! inner V2:        {"metadata":{"ciphertext","nonce","authenticationTag"},
//!                   "version":2, "users":[...], "filedrop":{...}}
//! V2 ciphertext:   {"files":{...},"folders":{...},"keyChecksums":[...]}
//! ```
//!
//! Decode accepts either the envelope or the inner document. Encode always
//! produces the inner document; the server adds the envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use veilfs_core::{MetadataError, MetadataResult};
use veilfs_crypto::{
    decrypt_payload, encrypt_payload, unwrap_metadata_key, wrap_with_public_key_pem,
    EncryptedPayload, MetadataKey,
};

use crate::document::{
    base64_decode, base64_encode, EncryptedFile, FolderMetadata, FolderUser, DIR_MIMETYPE,
    LEGACY_DIR_MIMETYPE,
};
use crate::migration::{self, ChecksumDecision};
use crate::version::SchemaVersion;

// ---- wire shapes ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OcsEnvelope {
    ocs: OcsBody,
}

#[derive(Debug, Deserialize)]
struct OcsBody {
    data: OcsData,
}

#[derive(Debug, Deserialize)]
struct OcsData {
    #[serde(rename = "meta-data")]
    meta_data: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<WireMetadataSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    users: Vec<WireUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filedrop: Option<Value>,
    /// V1 only: flat per-file map at the document root.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    files: BTreeMap<String, WireFile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMetadataSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<Value>,
    /// V1.2: the single RSA-wrapped key.
    #[serde(rename = "metadataKey", default, skip_serializing_if = "Option::is_none")]
    metadata_key: Option<String>,
    /// V1: generation-indexed RSA-wrapped keys.
    #[serde(
        rename = "metadataKeys",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    metadata_keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(
        rename = "authenticationTag",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    authentication_tag: Option<String>,
    /// Legacy sharing blob (V1/V1.2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sharing: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireUser {
    #[serde(rename = "userId")]
    user_id: String,
    certificate: String,
    #[serde(rename = "encryptedMetadataKey")]
    encrypted_metadata_key: String,
    #[serde(
        rename = "encryptedFiledropKey",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    encrypted_filedrop_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCipherSection {
    ciphertext: String,
    nonce: String,
    #[serde(rename = "authenticationTag")]
    authentication_tag: String,
}

/// Shape of the decrypted V2 ciphertext section, shared with the file-drop
/// section.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct CipherTextDocument {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) files: BTreeMap<String, WireFile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) folders: BTreeMap<String, String>,
    #[serde(
        rename = "keyChecksums",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub(crate) key_checksums: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) sharing: Option<Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireFile {
    #[serde(default)]
    pub(crate) filename: String,
    #[serde(default)]
    pub(crate) key: String,
    #[serde(default)]
    pub(crate) mimetype: String,
    #[serde(rename = "initializationVector", default)]
    pub(crate) initialization_vector: String,
    #[serde(rename = "authenticationTag", default)]
    pub(crate) authentication_tag: String,
}

// ---- decode --------------------------------------------------------------

/// Classify a raw payload's schema version without decrypting anything.
/// `None` means absent or unrecognized: oldest supported, needs migration.
pub fn peek_version(raw: &[u8]) -> Option<SchemaVersion> {
    let wire = parse_envelope(raw).ok()?;
    classify_wire(&wire)
}

fn classify_wire(wire: &WireDocument) -> Option<SchemaVersion> {
    let section_token = wire.metadata.as_ref().and_then(|m| m.version.as_ref());
    SchemaVersion::classify(section_token.or(wire.version.as_ref()))
}

fn parse_envelope(raw: &[u8]) -> MetadataResult<WireDocument> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| MetadataError::MalformedPayload(format!("metadata is not JSON: {e}")))?;

    let inner: Value = if value.get("ocs").is_some() {
        let envelope: OcsEnvelope = serde_json::from_value(value)
            .map_err(|e| MetadataError::MalformedPayload(format!("bad ocs envelope: {e}")))?;
        serde_json::from_str(&envelope.ocs.data.meta_data).map_err(|e| {
            MetadataError::MalformedPayload(format!("meta-data string is not JSON: {e}"))
        })?
    } else {
        value
    };

    serde_json::from_value(inner)
        .map_err(|e| MetadataError::MalformedPayload(format!("bad metadata document: {e}")))
}

/// Decode a raw payload into the document. The caller resets the document
/// on error; nothing here may leave partial state behind on failure paths
/// that matter (files are only populated after every cryptographic check
/// has passed).
pub(crate) fn decode_into(doc: &mut FolderMetadata, raw: &[u8]) -> MetadataResult<()> {
    let wire = parse_envelope(raw)?;

    let version = match classify_wire(&wire) {
        Some(version) => version,
        None => {
            debug!("no usable version token; treating as oldest supported");
            doc.needs_reencryption = true;
            SchemaVersion::V1
        }
    };
    doc.version = version;

    if version < SchemaVersion::V2 {
        decode_v1(doc, &wire)
    } else {
        decode_v2(doc, &wire)
    }
}

fn decode_v1(doc: &mut FolderMetadata, wire: &WireDocument) -> MetadataResult<()> {
    let section = wire
        .metadata
        .as_ref()
        .ok_or_else(|| MetadataError::MalformedPayload("missing metadata object".into()))?;

    // Prefer the V1.2 single wrapped key; fall back to the newest
    // generation-indexed legacy key.
    let mut resolved: Option<(u32, MetadataKey)> = None;
    if let Some(wrapped_b64) = &section.metadata_key {
        match base64_decode(wrapped_b64)
            .and_then(|wrapped| unwrap_metadata_key(&doc.account.private_key_pem, &wrapped))
        {
            Ok(key) => resolved = Some((0, key)),
            Err(e) => debug!(error = %e, "metadataKey field did not unwrap"),
        }
    }
    if resolved.is_none() {
        resolved = migration::bridge_legacy_key(&doc.account, &section.metadata_keys);
        if resolved.is_some() && doc.version < doc.required_version {
            debug!("bridged legacy metadata key below required version");
            doc.needs_reencryption = true;
        }
    }
    let (generation, key) = resolved.ok_or_else(|| {
        MetadataError::CryptoFailure("no decryptable metadata key in V1 document".into())
    })?;

    verify_key(doc, &key)?;

    doc.legacy_keys.insert(generation, key.clone());
    doc.metadata_key = Some(key);

    if let Some(sharing) = &section.sharing {
        parse_sharing(doc, sharing);
    }

    for (encrypted_filename, entry) in &wire.files {
        if let Some(file) = parse_wire_file(encrypted_filename, entry) {
            doc.files.push(file);
        }
    }

    Ok(())
}

fn decode_v2(doc: &mut FolderMetadata, wire: &WireDocument) -> MetadataResult<()> {
    let section = wire
        .metadata
        .as_ref()
        .ok_or_else(|| MetadataError::MalformedPayload("missing metadata object".into()))?;

    doc.file_drop = wire.filedrop.as_ref().and_then(parse_cipher_section);

    for user in &wire.users {
        let encrypted_metadata_key = base64_decode(&user.encrypted_metadata_key)
            .map_err(|e| MetadataError::MalformedPayload(format!("bad wrapped key: {e}")))?;
        let encrypted_filedrop_key = if user.encrypted_filedrop_key.is_empty() {
            Vec::new()
        } else {
            base64_decode(&user.encrypted_filedrop_key)
                .map_err(|e| MetadataError::MalformedPayload(format!("bad filedrop key: {e}")))?
        };
        doc.folder_users.insert(
            user.user_id.clone(),
            FolderUser {
                user_id: user.user_id.clone(),
                certificate_pem: user.certificate.clone(),
                encrypted_metadata_key,
                encrypted_filedrop_key,
            },
        );
    }

    // Our own wrapped key wins; otherwise decrypt with the key copied from
    // the ancestor during resolution.
    if let Some(own) = doc.folder_users.get(&doc.account.user_id) {
        let key = unwrap_metadata_key(&doc.account.private_key_pem, &own.encrypted_metadata_key)
            .map_err(|e| MetadataError::CryptoFailure(format!("metadata key unwrap: {e}")))?;
        doc.metadata_key = Some(key);
    }
    let key = doc
        .metadata_key
        .clone()
        .ok_or_else(|| MetadataError::CryptoFailure("no key available for decryption".into()))?;

    let payload = EncryptedPayload {
        ciphertext_b64: required(section.ciphertext.clone(), "ciphertext")?,
        nonce: decode_b64_field(&section.nonce, "nonce")?,
        tag: decode_b64_field(&section.authentication_tag, "authenticationTag")?,
    };
    let plaintext = decrypt_payload(&key, &payload)
        .map_err(|e| MetadataError::CryptoFailure(format!("metadata section: {e}")))?;

    let cipher_doc: CipherTextDocument = serde_json::from_slice(&plaintext)
        .map_err(|e| MetadataError::MalformedPayload(format!("decrypted section: {e}")))?;

    if doc.is_top_level() {
        doc.key_checksums = cipher_doc
            .key_checksums
            .iter()
            .filter(|digest| !digest.is_empty())
            .cloned()
            .collect();
    }

    verify_key(doc, &key)?;

    if let Some(sharing) = &cipher_doc.sharing {
        parse_sharing(doc, sharing);
    }

    for (encrypted_filename, entry) in &cipher_doc.files {
        if let Some(file) = parse_wire_file(encrypted_filename, entry) {
            doc.files.push(file);
        }
    }
    for (encrypted_filename, original_filename) in &cipher_doc.folders {
        if original_filename.is_empty() {
            continue;
        }
        doc.files.push(EncryptedFile {
            encrypted_filename: encrypted_filename.clone(),
            original_filename: original_filename.clone(),
            ..Default::default()
        });
    }

    Ok(())
}

/// Check the resolved key against the effective checksum set: the
/// document's own set at the top level, the ancestor's snapshot otherwise.
fn verify_key(doc: &mut FolderMetadata, key: &MetadataKey) -> MetadataResult<()> {
    match migration::verify_resolved_key(&doc.account, &doc.key_checksums, key) {
        ChecksumDecision::Valid | ChecksumDecision::NotYetVerifiable => Ok(()),
        ChecksumDecision::OverrideAccepted => {
            doc.needs_reencryption = true;
            Ok(())
        }
        ChecksumDecision::Mismatch => Err(MetadataError::ChecksumMismatch),
    }
}

pub(crate) fn parse_cipher_section(value: &Value) -> Option<EncryptedPayload> {
    let section: WireCipherSection = serde_json::from_value(value.clone()).ok()?;
    Some(EncryptedPayload {
        ciphertext_b64: section.ciphertext,
        nonce: base64_decode(&section.nonce).ok()?,
        tag: base64_decode(&section.authentication_tag).ok()?,
    })
}

pub(crate) fn parse_wire_file(encrypted_filename: &str, entry: &WireFile) -> Option<EncryptedFile> {
    if entry.filename.is_empty() {
        warn!(
            encrypted_filename,
            "skipping encrypted file with an empty original name"
        );
        return None;
    }
    let mimetype = if entry.mimetype == LEGACY_DIR_MIMETYPE {
        DIR_MIMETYPE.to_string()
    } else {
        entry.mimetype.clone()
    };
    Some(EncryptedFile {
        encrypted_filename: encrypted_filename.to_string(),
        original_filename: entry.filename.clone(),
        mimetype,
        encryption_key: base64_decode(&entry.key).unwrap_or_default(),
        initialization_vector: base64_decode(&entry.initialization_vector).unwrap_or_default(),
        authentication_tag: base64_decode(&entry.authentication_tag).unwrap_or_default(),
    })
}

fn parse_sharing(doc: &mut FolderMetadata, sharing: &Value) {
    // Legacy section: a JSON object of display name → public key. Older
    // servers stored it in formats this client no longer writes; anything
    // unrecognized is skipped, not fatal.
    match sharing {
        Value::Object(map) => {
            for (name, value) in map {
                if let Some(public_key_b64) = value.as_str() {
                    doc.sharing.push((name.clone(), public_key_b64.to_string()));
                }
            }
        }
        _ => debug!("skipping unrecognized legacy sharing section"),
    }
}

fn required(field: Option<String>, name: &str) -> MetadataResult<String> {
    field.ok_or_else(|| MetadataError::MalformedPayload(format!("missing field: {name}")))
}

fn decode_b64_field(field: &Option<String>, name: &str) -> MetadataResult<Vec<u8>> {
    let value = field
        .as_ref()
        .ok_or_else(|| MetadataError::MalformedPayload(format!("missing field: {name}")))?;
    base64_decode(value).map_err(|e| MetadataError::MalformedPayload(format!("{name}: {e}")))
}

// ---- encode --------------------------------------------------------------

/// Serialize a document for upload. V1 is retained only for folders that
/// were read as V1 and are not migration-flagged; everything else is V2.
pub(crate) fn encode(doc: &mut FolderMetadata) -> MetadataResult<Vec<u8>> {
    let keep_v1 = !doc.needs_reencryption
        && ((doc.is_top_level() && doc.version == SchemaVersion::V1)
            || doc.ancestor_version == Some(SchemaVersion::V1));
    if keep_v1 {
        encode_v1(doc)
    } else {
        encode_v2(doc)
    }
}

fn encode_v1(doc: &FolderMetadata) -> MetadataResult<Vec<u8>> {
    debug!(path = %doc.folder_path, "generating metadata for v1 encrypted folder");
    if doc.metadata_key.is_none() || doc.legacy_keys.is_empty() {
        return Err(MetadataError::CryptoFailure(
            "metadata generation failed: empty metadata key".into(),
        ));
    }

    let mut metadata_keys = BTreeMap::new();
    for (generation, key) in &doc.legacy_keys {
        let wrapped = wrap_with_public_key_pem(&doc.account.public_key_pem, key)
            .map_err(|e| MetadataError::CryptoFailure(format!("legacy key wrap: {e}")))?;
        metadata_keys.insert(generation.to_string(), base64_encode(&wrapped));
    }

    let mut files = BTreeMap::new();
    for file in &doc.files {
        files.insert(file.encrypted_filename.clone(), wire_file(file));
    }

    let wire = WireDocument {
        metadata: Some(WireMetadataSection {
            version: Some(SchemaVersion::V1.wire_token()),
            metadata_keys,
            ..Default::default()
        }),
        files,
        ..Default::default()
    };

    serde_json::to_vec(&wire).map_err(|e| MetadataError::Other(e.into()))
}

fn encode_v2(doc: &mut FolderMetadata) -> MetadataResult<Vec<u8>> {
    debug!(path = %doc.folder_path, "generating metadata v2");
    // Upgrading from a pre-V2 read rotates in a fresh key (top-level only;
    // descendants inherit whatever their ancestor carries).
    if doc.is_top_level() && (doc.version < SchemaVersion::V2 || doc.metadata_key.is_none()) {
        doc.create_new_metadata_key();
    }
    let key = doc.metadata_key.clone().ok_or_else(|| {
        MetadataError::CryptoFailure("metadata generation failed: empty metadata key".into())
    })?;
    // A document migrating up from V1 has no folder-user list yet; without
    // the owner's wrapped key the upload would be undecryptable.
    if doc.is_top_level() && doc.folder_users.is_empty() {
        doc.insert_self_user();
    }

    let mut cipher_doc = CipherTextDocument::default();
    for file in &doc.files {
        if file.is_directory() {
            cipher_doc
                .folders
                .insert(file.encrypted_filename.clone(), file.original_filename.clone());
        } else {
            cipher_doc
                .files
                .insert(file.encrypted_filename.clone(), wire_file(file));
        }
    }
    if doc.is_top_level() {
        cipher_doc.key_checksums = doc.key_checksums.iter().cloned().collect();
    }

    let plaintext =
        serde_json::to_vec(&cipher_doc).map_err(|e| MetadataError::Other(e.into()))?;
    let payload = encrypt_payload(&key, &plaintext)
        .map_err(|e| MetadataError::CryptoFailure(format!("metadata section: {e}")))?;

    let users: Vec<WireUser> = if doc.is_top_level() {
        doc.folder_users
            .values()
            .map(|user| WireUser {
                user_id: user.user_id.clone(),
                certificate: user.certificate_pem.clone(),
                encrypted_metadata_key: base64_encode(&user.encrypted_metadata_key),
                encrypted_filedrop_key: if user.encrypted_filedrop_key.is_empty() {
                    String::new()
                } else {
                    base64_encode(&user.encrypted_filedrop_key)
                },
            })
            .collect()
    } else {
        Vec::new()
    };
    if doc.is_top_level() && users.is_empty() {
        warn!(path = %doc.folder_path, "top-level folder has no folder users");
    }

    let filedrop = doc.file_drop.as_ref().map(|section| {
        serde_json::to_value(WireCipherSection {
            ciphertext: section.ciphertext_b64.clone(),
            nonce: base64_encode(&section.nonce),
            authentication_tag: base64_encode(&section.tag),
        })
        .expect("cipher section serializes")
    });

    let wire = WireDocument {
        metadata: Some(WireMetadataSection {
            ciphertext: Some(payload.ciphertext_b64),
            nonce: Some(base64_encode(&payload.nonce)),
            authentication_tag: Some(base64_encode(&payload.tag)),
            ..Default::default()
        }),
        version: Some(SchemaVersion::V2.wire_token()),
        users,
        filedrop,
        files: BTreeMap::new(),
    };

    let bytes = serde_json::to_vec(&wire).map_err(|e| MetadataError::Other(e.into()))?;

    // Migration is one-directional: once written as V2, stay V2.
    doc.version = SchemaVersion::V2;
    doc.needs_reencryption = false;

    Ok(bytes)
}

pub(crate) fn wire_file(file: &EncryptedFile) -> WireFile {
    WireFile {
        filename: file.original_filename.clone(),
        key: base64_encode(&file.encryption_key),
        mimetype: file.mimetype.clone(),
        initialization_vector: base64_encode(&file.initialization_vector),
        authentication_tag: base64_encode(&file.authentication_tag),
    }
}
