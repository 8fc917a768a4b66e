//! Directory-backed store: sidecar JSON metadata plus a blob area.
//!
//! Layout:
//! ```text
//! root/
//!   media/
//!     {content-id}.json    # display name, byte length
//!   blobs/
//!     {content-id}         # raw content
//!   staging/
//!     {hash(key)}.json     # export staging records
//! ```

use crate::record::ExportStagingRecord;
use crate::MediaStore;
use async_trait::async_trait;
use medialease_core::{
    ContentId, ContentMetadata, ContentSource, FileBytes, MediaError, MediaKind, Result,
    SharedSource,
};
use medialease_handles::StructuralKey;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Sidecar metadata persisted per media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMedia {
    id: ContentId,
    display_name: String,
    byte_length: u64,
}

/// Store rooted at a directory on disk.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        tokio::fs::create_dir_all(store.media_dir()).await?;
        tokio::fs::create_dir_all(store.blob_dir()).await?;
        tokio::fs::create_dir_all(store.staging_dir()).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Import content under a new id.
    pub async fn import(&self, display_name: &str, bytes: &[u8]) -> Result<ContentId> {
        let id = ContentId::new();
        tokio::fs::write(self.blob_path(id), bytes).await?;
        let meta = StoredMedia {
            id,
            display_name: display_name.to_string(),
            byte_length: bytes.len() as u64,
        };
        tokio::fs::write(self.media_path(id), serde_json::to_vec_pretty(&meta)?).await?;
        info!(id = %id, name = display_name, bytes = bytes.len(), "Imported media");
        Ok(id)
    }

    /// Import a file from disk, named after its file name.
    pub async fn import_file(&self, path: &Path) -> Result<ContentId> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MediaError::NotFound(format!("no file name in {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        self.import(&name, &bytes).await
    }

    async fn read_stored(&self, id: ContentId) -> Result<StoredMedia> {
        let path = self.media_path(id);
        let json = match tokio::fs::read(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MediaError::NotFound(format!("media {id}")))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&json).map_err(|e| {
            MediaError::Serialization(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    fn blob_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn media_path(&self, id: ContentId) -> PathBuf {
        self.media_dir().join(format!("{id}.json"))
    }

    fn blob_path(&self, id: ContentId) -> PathBuf {
        self.blob_dir().join(id.to_string())
    }

    fn record_path(&self, key: &StructuralKey) -> PathBuf {
        self.staging_dir()
            .join(ExportStagingRecord::storage_name(key))
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl MediaStore for DirectoryStore {
    async fn list_ids(&self) -> Result<Vec<ContentId>> {
        let mut ids = Vec::new();
        let mut dir = tokio::fs::read_dir(self.media_dir()).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ContentId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load_metadata(&self, id: ContentId) -> Result<ContentMetadata> {
        let stored = self.read_stored(id).await?;
        let has_content = tokio::fs::try_exists(self.blob_path(id)).await?;
        Ok(ContentMetadata {
            id,
            kind: MediaKind::from_name(&stored.display_name),
            display_name: stored.display_name,
            byte_length: stored.byte_length,
            has_content,
        })
    }

    async fn load_content(&self, id: ContentId) -> Result<SharedSource> {
        let stored = self.read_stored(id).await?;
        let blob = self.blob_path(id);
        if !tokio::fs::try_exists(&blob).await? {
            return Err(MediaError::NotFound(format!("content for media {id}")));
        }
        Ok(ContentSource::new(
            Arc::new(FileBytes::new(blob)),
            stored.byte_length,
            stored.display_name,
            crate::now_millis(),
        )
        .shared())
    }

    async fn remove_media(&self, id: ContentId) -> Result<()> {
        remove_if_exists(&self.media_path(id)).await?;
        remove_if_exists(&self.blob_path(id)).await?;
        debug!(id = %id, "Removed media");
        Ok(())
    }

    async fn persist_staging_record(&self, record: &ExportStagingRecord) -> Result<()> {
        let path = self.record_path(&record.content_key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_staging_record(&self, key: &StructuralKey) -> Result<Option<ExportStagingRecord>> {
        let json = match tokio::fs::read(self.record_path(key)).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: ExportStagingRecord = serde_json::from_slice(&json)?;
        // Hash collisions on the file name are not the same record.
        Ok((&record.content_key == key).then_some(record))
    }

    async fn remove_staging_record(&self, key: &StructuralKey) -> Result<()> {
        remove_if_exists(&self.record_path(key)).await
    }

    async fn list_staging_records(&self) -> Result<Vec<ExportStagingRecord>> {
        let mut records = Vec::new();
        let mut dir = tokio::fs::read_dir(self.staging_dir()).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice(&json)?);
        }
        Ok(records)
    }
}
