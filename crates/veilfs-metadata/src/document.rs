//! The folder metadata document.
//!
//! A [`FolderMetadata`] is either the top-level document of an encrypted
//! subtree (it owns the folder-user list and the authoritative checksum
//! set) or a descendant that borrows its key material from a shared
//! top-level ancestor. Documents under asynchronous construction are not
//! readable until their single setup-complete signal has fired.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use veilfs_core::{Account, MetadataResult};
use veilfs_crypto::key::generate_metadata_key;
use veilfs_crypto::{metadata_key_checksum, wrap_metadata_key, EncryptedPayload, MetadataKey};

use crate::codec;
use crate::version::SchemaVersion;

/// Legacy directory mimetype occasionally written by old clients; always
/// normalized to `httpd/unix-directory` on parse.
pub(crate) const LEGACY_DIR_MIMETYPE: &str = "inode/directory";
pub(crate) const DIR_MIMETYPE: &str = "httpd/unix-directory";

/// One file (or folder) entry in the decrypted listing.
///
/// Folder entries carry only the name pair; their mimetype is empty and
/// all key material fields are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedFile {
    /// Opaque server-visible name.
    pub encrypted_filename: String,
    pub original_filename: String,
    pub mimetype: String,
    /// Raw symmetric content key for the file body.
    pub encryption_key: Vec<u8>,
    pub initialization_vector: Vec<u8>,
    pub authentication_tag: Vec<u8>,
}

impl EncryptedFile {
    pub fn is_directory(&self) -> bool {
        self.mimetype.is_empty()
            || self.mimetype == DIR_MIMETYPE
            || self.mimetype == LEGACY_DIR_MIMETYPE
    }
}

/// A member of a shared encrypted folder. Top-level documents only.
#[derive(Debug, Clone)]
pub struct FolderUser {
    pub user_id: String,
    pub certificate_pem: String,
    /// Metadata key wrapped under this user's public key (raw bytes; base64
    /// only on the wire).
    pub encrypted_metadata_key: Vec<u8>,
    pub encrypted_filedrop_key: Vec<u8>,
}

/// A top-level document shared by reference among the descendants that
/// resolved through it. Key rotation on the ancestor is visible to every
/// holder.
pub type SharedFolderMetadata = Arc<RwLock<FolderMetadata>>;

/// Snapshot of the ancestor state a descendant copies at decode time.
#[derive(Debug, Clone)]
pub struct AncestorSnapshot {
    pub version: SchemaVersion,
    pub metadata_key: Option<MetadataKey>,
    pub key_checksums: BTreeSet<String>,
}

#[derive(Debug)]
pub struct FolderMetadata {
    pub(crate) account: Arc<Account>,
    pub(crate) folder_path: String,
    /// Path of the encryption root of this subtree. A document is
    /// top-level iff its own path equals the root path.
    pub(crate) top_level_path: String,
    /// Version the document was read as (or will be written as, for new
    /// documents).
    pub(crate) version: SchemaVersion,
    pub(crate) required_version: SchemaVersion,
    pub(crate) metadata_key: Option<MetadataKey>,
    /// Authoritative only on the top-level document; descendants hold the
    /// ancestor's snapshot and never mutate it.
    pub(crate) key_checksums: BTreeSet<String>,
    pub(crate) files: Vec<EncryptedFile>,
    pub(crate) folder_users: BTreeMap<String, FolderUser>,
    /// Legacy numbered metadata keys (V1 only); highest generation wins.
    pub(crate) legacy_keys: BTreeMap<u32, MetadataKey>,
    /// Legacy sharing list: (display name, public key base64). V1/V1.2.
    pub(crate) sharing: Vec<(String, String)>,
    /// Opaque file-drop section: ciphertext, nonce and tag kept as
    /// received until merged or re-uploaded.
    pub(crate) file_drop: Option<EncryptedPayload>,
    pub(crate) ancestor: Option<SharedFolderMetadata>,
    pub(crate) ancestor_version: Option<SchemaVersion>,
    pub(crate) needs_reencryption: bool,
    pub(crate) is_setup: bool,
    setup_tx: watch::Sender<bool>,
}

impl FolderMetadata {
    /// A bare, not-yet-set-up document. Call [`setup`](Self::setup) (or let
    /// the resolver drive it) before reading anything out of it.
    pub fn new(
        account: Arc<Account>,
        folder_path: impl Into<String>,
        top_level_path: impl Into<String>,
    ) -> Self {
        let (setup_tx, _) = watch::channel(false);
        Self {
            account,
            folder_path: folder_path.into(),
            top_level_path: top_level_path.into(),
            version: SchemaVersion::V2,
            required_version: SchemaVersion::V1_2,
            metadata_key: None,
            key_checksums: BTreeSet::new(),
            files: Vec::new(),
            folder_users: BTreeMap::new(),
            legacy_keys: BTreeMap::new(),
            sharing: Vec::new(),
            file_drop: None,
            ancestor: None,
            ancestor_version: None,
            needs_reencryption: false,
            is_setup: false,
            setup_tx,
        }
    }

    pub fn with_required_version(mut self, required: SchemaVersion) -> Self {
        self.required_version = required;
        self
    }

    /// Attach the shared ancestor and copy its key material. Descendant
    /// documents read the ancestor's checksum set; they never own one.
    pub fn attach_ancestor(&mut self, ancestor: SharedFolderMetadata, snapshot: AncestorSnapshot) {
        self.ancestor_version = Some(snapshot.version);
        if self.metadata_key.is_none() {
            self.metadata_key = snapshot.metadata_key;
        }
        self.key_checksums = snapshot.key_checksums;
        self.ancestor = Some(ancestor);
    }

    /// Snapshot the state a descendant copies during its own setup.
    pub fn snapshot(&self) -> AncestorSnapshot {
        AncestorSnapshot {
            version: self.version,
            metadata_key: self.metadata_key.clone(),
            key_checksums: self.key_checksums.clone(),
        }
    }

    /// Set the document up from a remote payload, or as brand-new when
    /// there is none. On error the document is left unusable, never
    /// half-populated. Does not fire setup-complete; the driver does that
    /// exactly once whatever the outcome.
    pub fn setup(&mut self, raw: Option<&[u8]>) -> MetadataResult<()> {
        match raw {
            Some(bytes) if !bytes.is_empty() => self.setup_existing(bytes),
            _ => {
                self.setup_empty();
                Ok(())
            }
        }
    }

    fn setup_empty(&mut self) {
        if self.ancestor_version == Some(SchemaVersion::V1) {
            self.setup_empty_v1();
        } else {
            self.setup_empty_v2();
        }
    }

    fn setup_empty_v2(&mut self) {
        debug!(path = %self.folder_path, "setting up empty metadata v2");
        self.version = SchemaVersion::V2;
        if self.metadata_key.is_none() {
            if self.is_top_level() {
                self.create_new_metadata_key();
            } else if self.ancestor.is_none() {
                // Detached construction (no ancestor attached, no
                // resolution requested): behaves as its own root.
                self.install_fresh_key();
            }
        }
        if self.is_top_level() {
            self.insert_self_user();
        }
        self.is_setup = self.metadata_key.is_some();
    }

    fn setup_empty_v1(&mut self) {
        debug!(path = %self.folder_path, "setting up empty metadata v1");
        self.version = SchemaVersion::V1;
        let key = generate_metadata_key();
        self.metadata_key = Some(key.clone());
        self.legacy_keys.insert(0, key);
        self.sharing.push((
            self.account.display_name.clone(),
            base64_encode(self.account.public_key_pem.as_bytes()),
        ));
        self.is_setup = true;
    }

    fn setup_existing(&mut self, raw: &[u8]) -> MetadataResult<()> {
        debug!(path = %self.folder_path, "setting up existing metadata");
        if let Err(e) = codec::decode_into(self, raw) {
            self.reset_unusable();
            return Err(e);
        }
        if self.metadata_key.is_none() {
            self.reset_unusable();
            return Err(veilfs_core::MetadataError::CryptoFailure(
                "no metadata key after decode".into(),
            ));
        }
        self.is_setup = true;
        Ok(())
    }

    /// Drop everything a failed decode may have touched. The well-defined
    /// unusable state: no key, no files, `is_metadata_setup() == false`.
    pub(crate) fn reset_unusable(&mut self) {
        self.metadata_key = None;
        self.files.clear();
        self.folder_users.clear();
        self.legacy_keys.clear();
        self.sharing.clear();
        self.file_drop = None;
        if self.is_top_level() {
            self.key_checksums.clear();
        }
        self.is_setup = false;
    }

    // ---- accessors ------------------------------------------------------

    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    pub fn is_top_level(&self) -> bool {
        self.folder_path == self.top_level_path
    }

    pub fn is_metadata_setup(&self) -> bool {
        self.is_setup
    }

    pub fn files(&self) -> &[EncryptedFile] {
        &self.files
    }

    pub fn metadata_key(&self) -> Option<&MetadataKey> {
        self.metadata_key.as_ref()
    }

    pub fn key_checksums(&self) -> &BTreeSet<String> {
        &self.key_checksums
    }

    pub fn folder_users(&self) -> &BTreeMap<String, FolderUser> {
        &self.folder_users
    }

    pub fn version_from_metadata(&self) -> SchemaVersion {
        self.version
    }

    pub fn is_file_drop_present(&self) -> bool {
        self.file_drop.is_some()
    }

    pub fn encrypted_metadata_need_update(&self) -> bool {
        self.needs_reencryption
    }

    /// Serialize the document for upload. See the codec for version
    /// selection; a migration-flagged document always comes out as V2.
    pub fn encrypted_metadata(&mut self) -> MetadataResult<Vec<u8>> {
        codec::encode(self)
    }

    // ---- setup-complete signal ------------------------------------------

    /// Subscribe to the setup-complete signal. The channel value flips to
    /// `true` exactly once per document.
    pub fn subscribe_setup(&self) -> watch::Receiver<bool> {
        self.setup_tx.subscribe()
    }

    /// Fire setup-complete. Idempotent: only the first call flips the
    /// channel, so the signal is observed exactly once.
    pub fn fire_setup_complete(&self) {
        if !*self.setup_tx.borrow() {
            let _ = self.setup_tx.send(true);
        }
    }

    // ---- file operations -------------------------------------------------

    /// Insert a file entry. One logical file per original filename:
    /// re-adding replaces the previous entry.
    pub fn add_encrypted_file(&mut self, file: EncryptedFile) {
        self.files
            .retain(|f| f.original_filename != file.original_filename);
        self.files.push(file);
    }

    pub fn remove_encrypted_file(&mut self, original_filename: &str) {
        self.files.retain(|f| f.original_filename != original_filename);
    }

    pub fn remove_all_encrypted_files(&mut self) {
        self.files.clear();
    }

    // ---- users and key rotation -----------------------------------------

    /// Add (or replace) a folder user. Top-level only; an empty user id or
    /// an unparsable certificate is rejected with no state change. Success
    /// rotates the metadata key so the departing state can never decrypt
    /// future metadata, and rewraps it for every member.
    pub fn add_user(&mut self, user_id: &str, certificate_pem: &str) -> bool {
        if !self.is_top_level() {
            warn!(path = %self.folder_path, "cannot add a folder user to a non top-level folder");
            return false;
        }
        if user_id.is_empty() {
            warn!("cannot add a folder user with an empty user id");
            return false;
        }
        if veilfs_crypto::public_key_from_certificate_pem(certificate_pem).is_err() {
            warn!(user_id, "cannot add a folder user with an invalid certificate");
            return false;
        }

        self.create_new_metadata_key();
        let key = self
            .metadata_key
            .clone()
            .expect("create_new_metadata_key installs a key on top-level documents");
        let encrypted_metadata_key = match wrap_metadata_key(certificate_pem, &key) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                warn!(user_id, error = %e, "could not wrap metadata key for new user");
                return false;
            }
        };
        self.folder_users.insert(
            user_id.to_string(),
            FolderUser {
                user_id: user_id.to_string(),
                certificate_pem: certificate_pem.to_string(),
                encrypted_metadata_key,
                encrypted_filedrop_key: Vec::new(),
            },
        );
        true
    }

    /// Remove a folder user. Top-level only; rotation happens before the
    /// removal so the remaining members get a key the removed user never
    /// saw wrapped for them.
    pub fn remove_user(&mut self, user_id: &str) -> bool {
        if !self.is_top_level() {
            warn!(path = %self.folder_path, "cannot remove a folder user from a non top-level folder");
            return false;
        }
        if user_id.is_empty() {
            warn!("cannot remove a folder user with an empty user id");
            return false;
        }
        if self.folder_users.remove(user_id).is_none() {
            return false;
        }
        self.create_new_metadata_key();
        true
    }

    /// Rotate the metadata key: atomically replace the old key's checksum
    /// with the new one and rewrap the key for every folder user.
    /// No-op on non-top-level documents, which never own key material.
    pub fn create_new_metadata_key(&mut self) {
        if !self.is_top_level() {
            return;
        }
        if let Some(old_key) = &self.metadata_key {
            let old_digest = metadata_key_checksum(&self.account.mnemonic_stripped(), old_key);
            self.key_checksums.remove(&old_digest);
        }
        self.install_fresh_key();
        self.rewrap_user_keys();
    }

    fn install_fresh_key(&mut self) {
        let key = generate_metadata_key();
        self.key_checksums
            .insert(metadata_key_checksum(&self.account.mnemonic_stripped(), &key));
        self.metadata_key = Some(key);
    }

    pub(crate) fn insert_self_user(&mut self) {
        let Some(key) = self.metadata_key.clone() else {
            return;
        };
        match wrap_metadata_key(&self.account.certificate_pem, &key) {
            Ok(wrapped) => {
                self.folder_users.insert(
                    self.account.user_id.clone(),
                    FolderUser {
                        user_id: self.account.user_id.clone(),
                        certificate_pem: self.account.certificate_pem.clone(),
                        encrypted_metadata_key: wrapped,
                        encrypted_filedrop_key: Vec::new(),
                    },
                );
            }
            Err(e) => {
                warn!(error = %e, "could not wrap metadata key for own account");
            }
        }
    }

    fn rewrap_user_keys(&mut self) {
        let Some(key) = self.metadata_key.clone() else {
            warn!("cannot rewrap folder user keys without a metadata key");
            return;
        };
        for user in self.folder_users.values_mut() {
            match wrap_metadata_key(&user.certificate_pem, &key) {
                Ok(wrapped) => user.encrypted_metadata_key = wrapped,
                Err(e) => {
                    // Entry kept; its stale wrapped key is replaced on the
                    // next successful rotation.
                    warn!(user_id = %user.user_id, error = %e, "could not rewrap metadata key");
                }
            }
        }
    }
}

pub(crate) fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

pub(crate) fn base64_decode(s: &str) -> anyhow::Result<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|e| anyhow::anyhow!("base64 decode: {e}"))
}
