//! In-memory store, for tests and embedding.

use crate::record::ExportStagingRecord;
use crate::MediaStore;
use async_trait::async_trait;
use bytes::Bytes;
use medialease_core::{
    ContentId, ContentMetadata, ContentSource, MediaError, MediaKind, MemoryBytes, Result,
    SharedSource,
};
use medialease_handles::StructuralKey;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

struct StoredItem {
    display_name: String,
    bytes: Option<Bytes>,
    byte_length: u64,
}

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<ContentId, StoredItem>>,
    staging: Mutex<HashMap<StructuralKey, ExportStagingRecord>>,
    content_loads: AtomicU64,
    clock: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item with content.
    pub fn insert(&self, display_name: impl Into<String>, bytes: impl Into<Bytes>) -> ContentId {
        let bytes = bytes.into();
        let id = ContentId::new();
        self.items.lock().insert(
            id,
            StoredItem {
                display_name: display_name.into(),
                byte_length: bytes.len() as u64,
                bytes: Some(bytes),
            },
        );
        id
    }

    /// Add an item whose metadata exists but whose content blob is missing.
    pub fn insert_missing(&self, display_name: impl Into<String>, byte_length: u64) -> ContentId {
        let id = ContentId::new();
        self.items.lock().insert(
            id,
            StoredItem {
                display_name: display_name.into(),
                bytes: None,
                byte_length,
            },
        );
        id
    }

    pub fn remove(&self, id: ContentId) -> bool {
        self.items.lock().remove(&id).is_some()
    }

    /// Number of `load_content` calls served.
    pub fn content_loads(&self) -> u64 {
        self.content_loads.load(Ordering::Relaxed)
    }

    // Strictly increasing so every load re-stamps a different mtime.
    fn next_mtime(&self) -> i64 {
        let now = crate::now_millis();
        let prev = self
            .clock
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        now.max(prev + 1)
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn list_ids(&self) -> Result<Vec<ContentId>> {
        Ok(self.items.lock().keys().copied().collect())
    }

    async fn load_metadata(&self, id: ContentId) -> Result<ContentMetadata> {
        let items = self.items.lock();
        let item = items
            .get(&id)
            .ok_or_else(|| MediaError::NotFound(format!("media {id}")))?;
        Ok(ContentMetadata {
            id,
            display_name: item.display_name.clone(),
            byte_length: item.byte_length,
            kind: MediaKind::from_name(&item.display_name),
            has_content: item.bytes.is_some(),
        })
    }

    async fn load_content(&self, id: ContentId) -> Result<SharedSource> {
        let (name, bytes) = {
            let items = self.items.lock();
            let item = items
                .get(&id)
                .ok_or_else(|| MediaError::NotFound(format!("media {id}")))?;
            let bytes = item
                .bytes
                .clone()
                .ok_or_else(|| MediaError::NotFound(format!("content for media {id}")))?;
            (item.display_name.clone(), bytes)
        };
        self.content_loads.fetch_add(1, Ordering::Relaxed);
        let byte_length = bytes.len() as u64;
        Ok(ContentSource::new(
            Arc::new(MemoryBytes::new(bytes)),
            byte_length,
            name,
            self.next_mtime(),
        )
        .shared())
    }

    async fn remove_media(&self, id: ContentId) -> Result<()> {
        self.remove(id);
        Ok(())
    }

    async fn persist_staging_record(&self, record: &ExportStagingRecord) -> Result<()> {
        self.staging
            .lock()
            .insert(record.content_key.clone(), record.clone());
        Ok(())
    }

    async fn read_staging_record(&self, key: &StructuralKey) -> Result<Option<ExportStagingRecord>> {
        Ok(self.staging.lock().get(key).cloned())
    }

    async fn remove_staging_record(&self, key: &StructuralKey) -> Result<()> {
        self.staging.lock().remove(key);
        Ok(())
    }

    async fn list_staging_records(&self) -> Result<Vec<ExportStagingRecord>> {
        Ok(self.staging.lock().values().cloned().collect())
    }
}
