//! Byte-bearing media sources and their metadata.
//!
//! A [`ContentSource`] is what the storage layer hands out on every content
//! load. Its `unstable_mtime` may differ between two loads of the same bytes,
//! so identity must never be derived from it.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

/// Shared reference to a content source. Identity of the allocation is what
/// the instance index keys on.
pub type SharedSource = Arc<ContentSource>;

/// Stable identifier of a media item in the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(pub Uuid);

impl ContentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ContentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Supplies the bytes behind a [`ContentSource`].
///
/// Each provider allocation is one "underlying content object": platforms that
/// tie handle validity to the object see two providers as unrelated even when
/// they hold identical bytes.
#[async_trait]
pub trait BytesProvider: Send + Sync + fmt::Debug {
    /// Read up to `len` bytes starting at `offset`. Short reads happen at end of content.
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

/// Bytes held in memory.
#[derive(Debug, Clone)]
pub struct MemoryBytes(Bytes);

impl MemoryBytes {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
impl BytesProvider for MemoryBytes {
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.0.len());
        let end = start.saturating_add(len).min(self.0.len());
        Ok(self.0.slice(start..end))
    }
}

/// Bytes read lazily from a file in the store's blob area.
#[derive(Debug, Clone)]
pub struct FileBytes {
    path: PathBuf,
}

impl FileBytes {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BytesProvider for FileBytes {
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len.min(1 << 20));
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Opaque identity of the provider allocation behind a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentObjectId(usize);

/// A byte-bearing media value: video, image or audio content plus the
/// attributes used to identify it.
#[derive(Clone)]
pub struct ContentSource {
    provider: Arc<dyn BytesProvider>,
    byte_length: u64,
    display_name: String,
    unstable_mtime: i64,
}

impl ContentSource {
    /// Create a source over an existing provider.
    pub fn new(
        provider: Arc<dyn BytesProvider>,
        byte_length: u64,
        display_name: impl Into<String>,
        unstable_mtime: i64,
    ) -> Self {
        Self {
            provider,
            byte_length,
            display_name: display_name.into(),
            unstable_mtime,
        }
    }

    /// Create a source over in-memory bytes. Every call creates a new content object.
    pub fn from_bytes(
        display_name: impl Into<String>,
        bytes: impl Into<Bytes>,
        unstable_mtime: i64,
    ) -> Self {
        let bytes = bytes.into();
        let byte_length = bytes.len() as u64;
        Self::new(
            Arc::new(MemoryBytes::new(bytes)),
            byte_length,
            display_name,
            unstable_mtime,
        )
    }

    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn unstable_mtime(&self) -> i64 {
        self.unstable_mtime
    }

    pub fn is_empty(&self) -> bool {
        self.byte_length == 0
    }

    pub fn provider(&self) -> &Arc<dyn BytesProvider> {
        &self.provider
    }

    /// Identity of the underlying content object.
    pub fn content_object_id(&self) -> ContentObjectId {
        ContentObjectId(Arc::as_ptr(&self.provider) as *const () as usize)
    }

    /// Read up to `len` bytes starting at `offset`.
    pub async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        self.provider.read_range(offset, len).await
    }

    /// Read the whole payload.
    pub async fn read_all(&self) -> io::Result<Bytes> {
        let len = usize::try_from(self.byte_length)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "source too large"))?;
        let bytes = self.provider.read_range(0, len).await?;
        if bytes.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{}: expected {} bytes, read {}",
                    self.display_name,
                    len,
                    bytes.len()
                ),
            ));
        }
        Ok(bytes)
    }

    /// Wrap in an `Arc` for sharing between consumers.
    pub fn shared(self) -> SharedSource {
        Arc::new(self)
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentSource")
            .field("display_name", &self.display_name)
            .field("byte_length", &self.byte_length)
            .field("unstable_mtime", &self.unstable_mtime)
            .finish_non_exhaustive()
    }
}

/// Kind of media, guessed from the display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Image,
    Audio,
    Other,
}

impl MediaKind {
    /// Guess from a file name's extension.
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("mp4" | "mov" | "webm" | "mkv" | "avi" | "m4v") => Self::Video,
            Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp") => Self::Image,
            Some("mp3" | "wav" | "aac" | "m4a" | "flac" | "ogg" | "opus") => Self::Audio,
            _ => Self::Other,
        }
    }
}

/// Metadata about a stored media item. Carries no bytes and never a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Store identifier.
    pub id: ContentId,
    /// Best-effort stable name.
    pub display_name: String,
    /// Size of the payload in bytes.
    pub byte_length: u64,
    /// Media kind.
    pub kind: MediaKind,
    /// Whether the content blob is present in the store.
    pub has_content: bool,
}

impl ContentMetadata {
    /// Whether a housekeeping pass should flag this item.
    pub fn needs_attention(&self) -> bool {
        self.byte_length == 0 || !self.has_content
    }
}
