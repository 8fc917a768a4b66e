//! medialease store - the persistence contract the resource manager consumes
//!
//! The resource manager needs very little from storage: metadata without
//! bytes, content sources when a handle will be needed, and a durable place
//! for export staging records. [`MediaStore`] is that contract.

pub mod directory;
pub mod memory;
pub mod record;

use async_trait::async_trait;
use medialease_core::{ContentId, ContentMetadata, Result, SharedSource};
use medialease_handles::StructuralKey;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;
pub use record::ExportStagingRecord;

/// Storage collaborator used by the loader and the export path resolver.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Ids of every stored media item.
    async fn list_ids(&self) -> Result<Vec<ContentId>>;

    /// Metadata only. Never reads content bytes.
    async fn load_metadata(&self, id: ContentId) -> Result<ContentMetadata>;

    /// A freshly materialised content source. Each call returns a new
    /// content object with a new modification time.
    async fn load_content(&self, id: ContentId) -> Result<SharedSource>;

    /// Delete an item's metadata and content. Removing a missing item is not an error.
    async fn remove_media(&self, id: ContentId) -> Result<()>;

    async fn persist_staging_record(&self, record: &ExportStagingRecord) -> Result<()>;

    async fn read_staging_record(&self, key: &StructuralKey) -> Result<Option<ExportStagingRecord>>;

    async fn remove_staging_record(&self, key: &StructuralKey) -> Result<()>;

    async fn list_staging_records(&self) -> Result<Vec<ExportStagingRecord>>;
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
