//! Durable note that a filesystem copy of some content already exists.

use medialease_handles::StructuralKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A staged on-disk copy of content, keyed by its structural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStagingRecord {
    /// Structural key of the staged content.
    pub content_key: StructuralKey,
    /// Path of the staged file.
    pub filesystem_path: PathBuf,
    /// When the copy was written (ms since Unix epoch).
    pub created_at_ms: i64,
    /// Size of the staged file, used to check it is still intact.
    pub byte_length: u64,
}

impl ExportStagingRecord {
    pub fn new(content_key: StructuralKey, filesystem_path: PathBuf, byte_length: u64) -> Self {
        Self {
            content_key,
            filesystem_path,
            created_at_ms: crate::now_millis(),
            byte_length,
        }
    }

    /// File name used to persist the record. Keys contain arbitrary display
    /// names, so the name is a hash of the key.
    pub fn storage_name(key: &StructuralKey) -> String {
        let digest = blake3::hash(key.as_str().as_bytes()).to_hex();
        format!("{}.json", &digest.as_str()[..32])
    }
}
