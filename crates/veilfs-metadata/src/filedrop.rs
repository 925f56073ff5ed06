//! File-drop merging.
//!
//! A file drop is a section of uploads deposited by users who can write
//! into the folder without being able to read it. The section stays opaque
//! through decode and re-encode; merging it into the regular listing is an
//! explicit, idempotent operation on the document.

use tracing::{debug, warn};

use veilfs_crypto::decrypt_payload;

use crate::codec::{self, CipherTextDocument};
use crate::document::{EncryptedFile, FolderMetadata};

impl FolderMetadata {
    /// Merge the pending file-drop entries into the file listing and clear
    /// the section, so the next upload carries no file drop.
    ///
    /// Returns `false` without touching any state when there is nothing to
    /// merge or when the section cannot be authenticated and parsed; a
    /// corrupt file drop is kept as received rather than silently dropped.
    pub fn move_from_file_drop_to_files(&mut self) -> bool {
        let Some(section) = &self.file_drop else {
            return false;
        };
        let Some(key) = &self.metadata_key else {
            warn!(path = %self.folder_path, "cannot merge file drop without a metadata key");
            return false;
        };
        if section.nonce.is_empty() {
            warn!(path = %self.folder_path, "file drop section carries no nonce");
            return false;
        }

        let plaintext = match decrypt_payload(key, section) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(path = %self.folder_path, error = %e, "file drop did not authenticate");
                return false;
            }
        };
        let cipher_doc: CipherTextDocument = match serde_json::from_slice(&plaintext) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %self.folder_path, error = %e, "file drop did not parse");
                return false;
            }
        };

        let mut merged = 0usize;
        for (encrypted_filename, entry) in &cipher_doc.files {
            if let Some(file) = codec::parse_wire_file(encrypted_filename, entry) {
                self.add_encrypted_file(file);
                merged += 1;
            }
        }
        for (encrypted_filename, original_filename) in &cipher_doc.folders {
            if original_filename.is_empty() {
                continue;
            }
            self.add_encrypted_file(EncryptedFile {
                encrypted_filename: encrypted_filename.clone(),
                original_filename: original_filename.clone(),
                ..Default::default()
            });
            merged += 1;
        }

        debug!(path = %self.folder_path, merged, "merged file drop into file listing");
        self.file_drop = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use veilfs_core::Account;
    use veilfs_crypto::{encrypt_payload, generate_metadata_key, EncryptedPayload};

    use crate::codec::{wire_file, CipherTextDocument};
    use crate::document::{EncryptedFile, FolderMetadata};

    const ALICE_KEY: &str = include_str!("../testdata/alice_key.pem");
    const ALICE_CERT: &str = include_str!("../testdata/alice_cert.pem");
    const ALICE_PUB: &str = include_str!("../testdata/alice_pub.pem");

    fn alice() -> Arc<Account> {
        Arc::new(Account {
            user_id: "alice".into(),
            display_name: "Alice".into(),
            certificate_pem: ALICE_CERT.into(),
            public_key_pem: ALICE_PUB.into(),
            private_key_pem: ALICE_KEY.into(),
            mnemonic: SecretString::from("orbit lunar pine cedar maple oak"),
            skip_checksum_validation: false,
        })
    }

    fn top_level() -> FolderMetadata {
        let mut doc = FolderMetadata::new(alice(), "/enc", "/enc");
        doc.setup(None).unwrap();
        doc
    }

    fn drop_section(doc: &FolderMetadata, files: &[EncryptedFile]) -> EncryptedPayload {
        let mut cipher_doc = CipherTextDocument::default();
        for file in files {
            cipher_doc
                .files
                .insert(file.encrypted_filename.clone(), wire_file(file));
        }
        let plaintext = serde_json::to_vec(&cipher_doc).unwrap();
        encrypt_payload(doc.metadata_key().unwrap(), &plaintext).unwrap()
    }

    fn dropped_file() -> EncryptedFile {
        EncryptedFile {
            encrypted_filename: "drop1.bin".into(),
            original_filename: "delivery.pdf".into(),
            mimetype: "application/pdf".into(),
            encryption_key: vec![4; 32],
            initialization_vector: vec![5; 16],
            authentication_tag: vec![6; 16],
        }
    }

    #[test]
    fn test_merge_moves_entries_and_clears_section() {
        let mut doc = top_level();
        doc.file_drop = Some(drop_section(&doc, &[dropped_file()]));

        assert!(doc.move_from_file_drop_to_files());

        assert!(!doc.is_file_drop_present());
        assert_eq!(doc.files().len(), 1);
        assert_eq!(doc.files()[0].original_filename, "delivery.pdf");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut doc = top_level();
        doc.file_drop = Some(drop_section(&doc, &[dropped_file()]));

        assert!(doc.move_from_file_drop_to_files());
        assert!(!doc.move_from_file_drop_to_files());
        assert_eq!(doc.files().len(), 1);
    }

    #[test]
    fn test_merge_without_section_or_key() {
        let mut doc = top_level();
        assert!(!doc.move_from_file_drop_to_files());

        doc.file_drop = Some(drop_section(&doc, &[dropped_file()]));
        doc.metadata_key = None;
        assert!(!doc.move_from_file_drop_to_files());
        assert!(doc.is_file_drop_present());
    }

    #[test]
    fn test_tampered_section_is_kept_unmerged() {
        let mut doc = top_level();
        let mut section = drop_section(&doc, &[dropped_file()]);
        section.tag[0] ^= 0xff;
        doc.file_drop = Some(section);

        assert!(!doc.move_from_file_drop_to_files());
        assert!(doc.is_file_drop_present());
        assert!(doc.files().is_empty());
    }

    #[test]
    fn test_merge_replaces_same_original_name() {
        let mut doc = top_level();
        doc.add_encrypted_file(EncryptedFile {
            encrypted_filename: "old.bin".into(),
            original_filename: "delivery.pdf".into(),
            mimetype: "application/pdf".into(),
            ..Default::default()
        });
        doc.file_drop = Some(drop_section(&doc, &[dropped_file()]));

        assert!(doc.move_from_file_drop_to_files());
        assert_eq!(doc.files().len(), 1);
        assert_eq!(doc.files()[0].encrypted_filename, "drop1.bin");
    }
}
