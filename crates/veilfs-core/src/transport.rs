//! Transport contract consumed by the metadata layer.
//!
//! The metadata subsystem never issues HTTP itself; it talks to whatever
//! implements this trait. No retry or timeout logic lives behind it — the
//! transport is assumed to eventually complete with success, an error, or
//! a not-found result.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::MetadataResult;

#[async_trait]
pub trait MetadataTransport: Send + Sync {
    /// List a directory, returning child name → opaque folder identifier.
    async fn list_directory(&self, path: &str) -> MetadataResult<BTreeMap<String, String>>;

    /// Fetch a folder's encrypted metadata blob. `None` means 404: the
    /// folder exists but has never been encrypted.
    async fn get_metadata(&self, folder_id: &str) -> MetadataResult<Option<Vec<u8>>>;

    /// Upload a folder's encrypted metadata under a held lock token.
    async fn update_metadata(
        &self,
        folder_id: &str,
        payload: &[u8],
        lock_token: &str,
    ) -> MetadataResult<()>;
}
