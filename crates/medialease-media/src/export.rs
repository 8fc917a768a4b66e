//! On-disk staging of content for external encoders.
//!
//! Encoder processes want a real filesystem path, not an ephemeral handle.
//! [`ExportPathResolver`] writes a durable copy once per structural key and
//! remembers it with an [`ExportStagingRecord`] so later calls (and later
//! process runs) reuse it. It reads bytes straight from the source and never
//! touches the handle table.

use medialease_core::{ContentSource, MediaError, Result};
use medialease_handles::StructuralKey;
use medialease_store::{ExportStagingRecord, MediaStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Handle for cancelling an in-progress staging write.
#[derive(Debug, Clone)]
pub struct StagingCancel(Arc<AtomicBool>);

impl StagingCancel {
    /// Create a new cancel handle.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for StagingCancel {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a staging file unless the write was committed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial staging file"),
        }
    }
}

/// Materialises durable on-disk copies of content on demand.
pub struct ExportPathResolver {
    store: Arc<dyn MediaStore>,
    staging_dir: PathBuf,
    chunk_size: usize,
    key_locks: Mutex<HashMap<StructuralKey, Arc<tokio::sync::Mutex<()>>>>,
    writes: AtomicU64,
}

impl ExportPathResolver {
    pub fn new(store: Arc<dyn MediaStore>, staging_dir: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            store,
            staging_dir: staging_dir.into(),
            chunk_size: chunk_size.max(1),
            key_locks: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Number of staging files written by this resolver.
    pub fn materialized_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Filesystem path holding a copy of `source`, writing one if needed.
    pub async fn resolve_path(&self, source: &ContentSource) -> Result<PathBuf> {
        self.resolve_path_with_cancel(source, &StagingCancel::new())
            .await
    }

    /// Like [`resolve_path`](Self::resolve_path), checking `cancel` between chunks.
    ///
    /// Cancellation (through `cancel` or by dropping the future) removes any
    /// partial file and persists no record.
    pub async fn resolve_path_with_cancel(
        &self,
        source: &ContentSource,
        cancel: &StagingCancel,
    ) -> Result<PathBuf> {
        let key = StructuralKey::for_source(source);
        let lock = self.key_lock(&key);
        let _serialised = lock.lock().await;

        if let Some(record) = self.store.read_staging_record(&key).await? {
            if is_intact(&record).await {
                debug!(key = %key, path = %record.filesystem_path.display(), "Reusing staged export");
                return Ok(record.filesystem_path);
            }
            warn!(key = %key, path = %record.filesystem_path.display(), "Staged export missing or changed; restaging");
            self.store.remove_staging_record(&key).await?;
        }

        let path = self.staged_path(&key, source.display_name());
        self.materialize(source, &key, &path, cancel).await?;
        // The copy only counts once its record is durable.
        let mut staged = PartialFile {
            path: path.clone(),
            committed: false,
        };

        let record = ExportStagingRecord::new(key.clone(), path.clone(), source.byte_length());
        self.store.persist_staging_record(&record).await?;
        staged.commit();
        info!(key = %key, path = %path.display(), bytes = source.byte_length(), "Staged export copy");
        Ok(path)
    }

    /// Remove the staged copy and record for `source` (the media was deleted).
    pub async fn discard(&self, source: &ContentSource) -> Result<bool> {
        self.discard_key(&StructuralKey::for_source(source)).await
    }

    /// Remove the staged copy and record stored under `key`, if any.
    pub async fn discard_key(&self, key: &StructuralKey) -> Result<bool> {
        let lock = self.key_lock(key);
        let _serialised = lock.lock().await;

        let Some(record) = self.store.read_staging_record(key).await? else {
            return Ok(false);
        };
        remove_quietly(&record.filesystem_path).await;
        self.store.remove_staging_record(key).await?;
        debug!(key = %key, "Discarded staged export");
        Ok(true)
    }

    /// Remove every staged copy and record. Returns how many were removed.
    ///
    /// Each removal holds its key's lock, so a concurrent resolve either
    /// finishes first and is cleared whole or restages afterwards.
    pub async fn clear_staged(&self) -> Result<usize> {
        let records = self.store.list_staging_records().await?;
        for record in &records {
            let lock = self.key_lock(&record.content_key);
            let _serialised = lock.lock().await;
            remove_quietly(&record.filesystem_path).await;
            self.store.remove_staging_record(&record.content_key).await?;
        }
        info!(count = records.len(), "Cleared staged exports");
        Ok(records.len())
    }

    fn key_lock(&self, key: &StructuralKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }

    /// `<staging_dir>/<hash(key)>-<sanitised name>`. The name keeps its
    /// extension so encoders can sniff the container.
    fn staged_path(&self, key: &StructuralKey, display_name: &str) -> PathBuf {
        let digest = blake3::hash(key.as_str().as_bytes()).to_hex();
        let name: String = display_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = name.trim_start_matches('.');
        self.staging_dir
            .join(format!("{}-{}", &digest.as_str()[..16], name))
    }

    async fn materialize(
        &self,
        source: &ContentSource,
        key: &StructuralKey,
        path: &Path,
        cancel: &StagingCancel,
    ) -> Result<()> {
        let failed = |e: io::Error| MediaError::ExportStagingFailed {
            key: key.to_string(),
            source: e,
        };

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(failed)?;

        let mut partial_name = path.file_name().unwrap_or_default().to_os_string();
        partial_name.push(".partial");
        let partial_path = path.with_file_name(partial_name);

        // Created and renamed synchronously: a pending blocking create or
        // rename could otherwise land after the guard has cleaned up.
        let created = std::fs::File::create(&partial_path).map_err(failed)?;
        let mut partial = PartialFile {
            path: partial_path,
            committed: false,
        };
        let mut file = tokio::fs::File::from_std(created);
        let total = source.byte_length();
        let mut offset = 0u64;
        while offset < total {
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled(format!("staging {key}")));
            }
            let want = (total - offset).min(self.chunk_size as u64) as usize;
            let chunk = source.read_range(offset, want).await.map_err(failed)?;
            if chunk.is_empty() {
                return Err(failed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended at {offset} of {total} bytes"),
                )));
            }
            file.write_all(&chunk).await.map_err(failed)?;
            offset += chunk.len() as u64;
        }
        file.flush().await.map_err(failed)?;
        file.sync_all().await.map_err(failed)?;
        drop(file);

        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled(format!("staging {key}")));
        }
        std::fs::rename(&partial.path, path).map_err(failed)?;
        partial.commit();
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A staged file is reusable when it exists with the recorded size.
async fn is_intact(record: &ExportStagingRecord) -> bool {
    tokio::fs::metadata(&record.filesystem_path)
        .await
        .is_ok_and(|m| m.is_file() && m.len() == record.byte_length)
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged file"),
    }
}
