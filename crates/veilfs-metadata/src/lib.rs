//! veilfs-metadata: the E2EE folder metadata document and its codec
//!
//! A folder's file listing, per-file content keys, and sharing key material
//! live in an opaque blob the server cannot read. This crate owns:
//!
//! - the in-memory document ([`FolderMetadata`]) and its operations
//! - the versioned wire codec (V1 / V1.2 / V2) with silent read-migration
//! - asynchronous key-hierarchy resolution for nested folders
//!   ([`MetadataResolver`])
//! - the file-drop merge
//!
//! Decode is fail-closed end to end: an authentication failure anywhere
//! leaves the document in a well-defined unusable state, never a
//! half-populated one.

pub mod codec;
pub mod document;
pub mod filedrop;
pub mod migration;
pub mod resolver;
pub mod version;

pub use document::{EncryptedFile, FolderMetadata, FolderUser, SharedFolderMetadata};
pub use resolver::{MetadataResolver, ResolveState};
pub use version::SchemaVersion;
