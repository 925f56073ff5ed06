//! Asynchronous key-hierarchy resolution.
//!
//! A nested encrypted folder cannot decrypt its own metadata in isolation:
//! its key lives in the top-level document of the subtree. The resolver
//! drives the two-step ancestor fetch (directory listing to learn the
//! top-level folder id, then the metadata download), shares the resulting
//! ancestor document among every descendant that asked for it, and folds
//! transport failures into an empty ancestor so a flaky server degrades to
//! "folder not yet set up" instead of an error cascade.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use veilfs_core::{Account, MetadataError, MetadataResult, MetadataTransport};

use crate::codec;
use crate::document::{FolderMetadata, SharedFolderMetadata};
use crate::version::SchemaVersion;

/// Phases of a single resolution, in order. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    AwaitingAncestorId,
    AwaitingAncestorMetadata,
    Decoding,
    Ready,
    Failed,
}

/// Resolves folder metadata documents against a [`MetadataTransport`],
/// deduplicating the ancestor fetch per top-level path: concurrent
/// resolutions of sibling folders trigger exactly one two-step sequence.
pub struct MetadataResolver {
    transport: Arc<dyn MetadataTransport>,
    ancestors: Mutex<HashMap<String, Arc<OnceCell<SharedFolderMetadata>>>>,
}

impl MetadataResolver {
    pub fn new(transport: Arc<dyn MetadataTransport>) -> Self {
        Self {
            transport,
            ancestors: Mutex::new(HashMap::new()),
        }
    }

    /// Build and set up the document for `folder_path`, fetching and
    /// attaching the shared top-level ancestor when the payload needs one.
    ///
    /// Decode failures do not surface as errors here: the returned document
    /// reports `is_metadata_setup() == false` and its setup-complete signal
    /// has fired. Only cancellation aborts the resolution.
    pub async fn setup_document(
        &self,
        account: Arc<Account>,
        folder_path: &str,
        top_level_path: &str,
        raw: Option<Vec<u8>>,
        cancel: CancellationToken,
    ) -> MetadataResult<SharedFolderMetadata> {
        let mut doc = FolderMetadata::new(account.clone(), folder_path, top_level_path);

        if needs_ancestor(&doc, raw.as_deref()) {
            let ancestor = self
                .resolve_ancestor(account, top_level_path, &cancel)
                .await?;
            let snapshot = ancestor.read().await.snapshot();
            doc.attach_ancestor(ancestor, snapshot);
        }
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }

        self.transition(folder_path, ResolveState::Decoding);
        let state = match doc.setup(raw.as_deref()) {
            Ok(()) => ResolveState::Ready,
            Err(e) => {
                warn!(path = %folder_path, error = %e, "metadata setup failed; document unusable");
                ResolveState::Failed
            }
        };
        self.transition(folder_path, state);

        doc.fire_setup_complete();
        Ok(Arc::new(tokio::sync::RwLock::new(doc)))
    }

    /// Fetch (or reuse) the shared top-level document for `top_level_path`.
    async fn resolve_ancestor(
        &self,
        account: Arc<Account>,
        top_level_path: &str,
        cancel: &CancellationToken,
    ) -> MetadataResult<SharedFolderMetadata> {
        let cell = {
            let mut ancestors = self.ancestors.lock().await;
            ancestors
                .entry(top_level_path.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(|| self.fetch_ancestor(account, top_level_path, cancel))
            .await
            .cloned()
    }

    async fn fetch_ancestor(
        &self,
        account: Arc<Account>,
        top_level_path: &str,
        cancel: &CancellationToken,
    ) -> MetadataResult<SharedFolderMetadata> {
        self.transition(top_level_path, ResolveState::AwaitingAncestorId);
        let folder_id = tokio::select! {
            _ = cancel.cancelled() => return Err(MetadataError::Cancelled),
            listing = self.transport.list_directory(top_level_path) => match listing {
                Ok(entries) => entries
                    .get(top_level_path)
                    .cloned()
                    .or_else(|| entries.values().next().cloned()),
                Err(e) => {
                    warn!(path = %top_level_path, error = %e, "top-level folder id lookup failed");
                    None
                }
            },
        };

        let raw = match folder_id {
            Some(id) => {
                self.transition(top_level_path, ResolveState::AwaitingAncestorMetadata);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MetadataError::Cancelled),
                    payload = self.transport.get_metadata(&id) => match payload {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!(path = %top_level_path, error = %e, "top-level metadata fetch failed");
                            None
                        }
                    },
                }
            }
            None => None,
        };

        self.transition(top_level_path, ResolveState::Decoding);
        let mut ancestor = FolderMetadata::new(account, top_level_path, top_level_path);
        let state = match ancestor.setup(raw.as_deref()) {
            Ok(()) => ResolveState::Ready,
            Err(e) => {
                warn!(path = %top_level_path, error = %e, "ancestor setup failed; treated as empty");
                ResolveState::Failed
            }
        };
        self.transition(top_level_path, state);
        ancestor.fire_setup_complete();

        Ok(Arc::new(tokio::sync::RwLock::new(ancestor)))
    }

    fn transition(&self, path: &str, state: ResolveState) {
        debug!(path, state = ?state, "metadata resolution");
    }
}

/// A document needs its ancestor when it is nested and its payload is
/// absent, unclassifiable, or a hierarchy-keyed format. V1-era payloads
/// carry their own wrapped keys and resolve standalone.
fn needs_ancestor(doc: &FolderMetadata, raw: Option<&[u8]>) -> bool {
    if doc.is_top_level() {
        return false;
    }
    match raw {
        None => true,
        Some(bytes) => match codec::peek_version(bytes) {
            None => true,
            Some(version) => version >= SchemaVersion::V2,
        },
    }
}
