//! medialease media - resource lifecycle for media consumers
//!
//! This crate handles:
//! - Lazy source loading (metadata scans never create handles)
//! - Isolation of short-lived extraction operations
//! - On-disk export staging for external encoders
//! - [`MediaResources`], which wires these together from one config

pub mod export;
pub mod isolate;
pub mod loader;

pub use export::{ExportPathResolver, StagingCancel};
pub use isolate::{IsolatedHandle, TemporaryOperationIsolator};
pub use loader::{HandleLease, LazySourceLoader};

use medialease_core::{ContentId, ContentSource, MediaError, ResourceConfig, Result, SharedSource};
use medialease_handles::{
    HandlePlatform, HandleTable, HandleUri, SnapshotEntry, StructuralKey, TableStats,
};
use medialease_store::MediaStore;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// The resource manager, constructed once at startup and shared by reference.
///
/// Cloning is cheap; clones share the same handle table.
#[derive(Clone)]
pub struct MediaResources {
    config: Arc<ResourceConfig>,
    store: Arc<dyn MediaStore>,
    table: HandleTable,
    loader: LazySourceLoader,
    isolator: TemporaryOperationIsolator,
    exports: Arc<ExportPathResolver>,
}

impl MediaResources {
    /// Build on the current Tokio runtime.
    pub fn new(
        config: ResourceConfig,
        store: Arc<dyn MediaStore>,
        platform: Arc<dyn HandlePlatform>,
    ) -> Result<Self> {
        config.validate()?;
        let table = HandleTable::new(platform, config.grace_delay())?;
        let loader = LazySourceLoader::new(store.clone(), table.clone(), config.hash_prefix_len);
        let isolator = TemporaryOperationIsolator::new(
            table.clone(),
            config.isolation_timeout(),
            config.isolation_grace(),
        );
        let exports = Arc::new(ExportPathResolver::new(
            store.clone(),
            config.staging_dir(),
            config.copy_chunk_size,
        ));
        info!(
            grace_ms = config.grace_delay_ms,
            staging = %exports.staging_dir().display(),
            "Media resources initialized"
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            table,
            loader,
            isolator,
            exports,
        })
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn table(&self) -> &HandleTable {
        &self.table
    }

    pub fn loader(&self) -> &LazySourceLoader {
        &self.loader
    }

    pub fn isolator(&self) -> &TemporaryOperationIsolator {
        &self.isolator
    }

    pub fn exports(&self) -> &ExportPathResolver {
        &self.exports
    }

    /// Obtain a playable handle for `source`.
    pub fn obtain_handle(&self, source: &SharedSource, purpose: &str) -> Result<HandleUri> {
        self.loader.obtain_handle(source, purpose)
    }

    pub fn release_handle(&self, handle: &HandleUri, purpose: &str) {
        self.loader.release_handle(handle, purpose);
    }

    /// Run a transient extraction against an isolated copy of `source`.
    pub async fn run_isolated<T, F, Fut>(
        &self,
        source: &SharedSource,
        purpose: &str,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(IsolatedHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.isolator.run(source, purpose, op).await
    }

    /// Filesystem path for an external encoder.
    pub async fn resolve_path(&self, source: &ContentSource) -> Result<PathBuf> {
        self.exports.resolve_path(source).await
    }

    /// Delete a media item along with its staged export copy and record.
    pub async fn remove_media(&self, id: ContentId) -> Result<()> {
        match self.store.load_metadata(id).await {
            Ok(meta) => {
                let key = StructuralKey::from_parts(meta.byte_length, &meta.display_name);
                if self.exports.discard_key(&key).await? {
                    debug!(id = %id, key = %key, "Discarded export copy of removed media");
                }
            }
            Err(MediaError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.store.remove_media(id).await?;
        info!(id = %id, "Removed media");
        Ok(())
    }

    pub fn debug_snapshot(&self) -> Vec<SnapshotEntry> {
        self.table.debug_snapshot()
    }

    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Revoke everything still live. Returns the number of handles revoked.
    pub fn shutdown(&self) -> usize {
        let revoked = self.table.revoke_all();
        info!(revoked, "Media resources shut down");
        revoked
    }
}
