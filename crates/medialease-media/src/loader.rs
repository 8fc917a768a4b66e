//! Lazy source loading: metadata and content without handles by default.
//!
//! Library listings and housekeeping passes go through the metadata methods
//! and never touch the handle table. A handle is only created when a consumer
//! that renders or probes content calls [`LazySourceLoader::obtain_handle`].

use medialease_core::{ContentId, ContentMetadata, MediaError, Result, SharedSource};
use medialease_handles::{HandleTable, HandleUri, IdentityResolver};
use medialease_store::MediaStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exposes content sources without handles and hands out handles on request.
#[derive(Clone)]
pub struct LazySourceLoader {
    store: Arc<dyn MediaStore>,
    table: HandleTable,
    hash_prefix_len: usize,
}

impl LazySourceLoader {
    pub fn new(store: Arc<dyn MediaStore>, table: HandleTable, hash_prefix_len: usize) -> Self {
        Self {
            store,
            table,
            hash_prefix_len,
        }
    }

    /// Metadata for one item. No bytes, no handle.
    pub async fn load_metadata(&self, id: ContentId) -> Result<ContentMetadata> {
        self.store.load_metadata(id).await
    }

    /// Metadata for every stored item.
    pub async fn scan_library(&self) -> Result<Vec<ContentMetadata>> {
        let ids = self.store.list_ids().await?;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            items.push(self.store.load_metadata(id).await?);
        }
        debug!(count = items.len(), "Scanned library metadata");
        Ok(items)
    }

    /// Items with zero length or a missing blob.
    pub async fn find_needing_attention(&self) -> Result<Vec<ContentMetadata>> {
        let flagged: Vec<_> = self
            .scan_library()
            .await?
            .into_iter()
            .filter(ContentMetadata::needs_attention)
            .collect();
        if !flagged.is_empty() {
            info!(count = flagged.len(), "Media items need attention");
        }
        Ok(flagged)
    }

    /// Load a content source without creating a handle.
    pub async fn load_source(&self, id: ContentId) -> Result<SharedSource> {
        self.store.load_content(id).await
    }

    /// Obtain a playable handle for `source`.
    pub fn obtain_handle(&self, source: &SharedSource, purpose: &str) -> Result<HandleUri> {
        self.table.acquire(source, purpose)
    }

    /// Obtain a handle keyed by a content hash as well as size and name, for
    /// callers that cannot accept a structural-key false positive.
    pub async fn obtain_handle_verified(
        &self,
        source: &SharedSource,
        purpose: &str,
    ) -> Result<HandleUri> {
        if source.is_empty() {
            return Err(MediaError::EmptySource {
                name: source.display_name().to_string(),
            });
        }
        let key = IdentityResolver::content_key(source, self.hash_prefix_len).await?;
        self.table.acquire_keyed(source, key, purpose)
    }

    /// Obtain a handle that is released when the lease is dropped.
    pub fn obtain_lease(&self, source: &SharedSource, purpose: &str) -> Result<HandleLease> {
        let handle = self.obtain_handle(source, purpose)?;
        Ok(HandleLease {
            table: self.table.clone(),
            handle,
            purpose: purpose.to_string(),
            released: false,
        })
    }

    /// Load by id and obtain a handle in one step.
    pub async fn open(&self, id: ContentId, purpose: &str) -> Result<(SharedSource, HandleUri)> {
        let source = self.load_source(id).await?;
        let handle = self.obtain_handle(&source, purpose)?;
        Ok((source, handle))
    }

    pub fn release_handle(&self, handle: &HandleUri, purpose: &str) {
        debug!(handle = %handle, purpose, "Releasing handle");
        self.table.release(handle);
    }

    /// Replace a handle the platform rejected with a fresh one for the same source.
    ///
    /// The stale entry is force-revoked so no other consumer is handed it.
    pub fn refresh_handle(
        &self,
        stale: &HandleUri,
        source: &SharedSource,
        purpose: &str,
    ) -> Result<HandleUri> {
        if let Err(e) = self.table.force_revoke(stale) {
            // Already gone (another consumer recovered first); a fresh acquire still works.
            debug!(handle = %stale, error = %e, "Stale handle already revoked");
        }
        let fresh = self.table.acquire(source, purpose)?;
        warn!(stale = %stale, fresh = %fresh, purpose, "Replaced stale handle");
        Ok(fresh)
    }

    /// Check a handle before use, recovering with a fresh one when it is stale.
    ///
    /// A handle the table no longer knows is treated the same way: another
    /// holder of the same handle may have recovered first and retired it.
    pub fn ensure_usable(
        &self,
        handle: &HandleUri,
        source: &SharedSource,
        purpose: &str,
    ) -> Result<HandleUri> {
        match self.table.validate(handle) {
            Ok(()) => Ok(handle.clone()),
            Err(e) if e.is_stale() || matches!(e, MediaError::UnknownHandle { .. }) => {
                self.refresh_handle(handle, source, purpose)
            }
            Err(e) => Err(e),
        }
    }

    pub fn table(&self) -> &HandleTable {
        &self.table
    }
}

/// A held handle that releases itself on drop.
pub struct HandleLease {
    table: HandleTable,
    handle: HandleUri,
    purpose: String,
    released: bool,
}

impl HandleLease {
    pub fn handle(&self) -> &HandleUri {
        &self.handle
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Release now rather than at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.table.release(&self.handle);
        }
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.release_once();
    }
}
