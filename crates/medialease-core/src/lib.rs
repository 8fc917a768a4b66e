//! medialease core - foundation types for media resource management
//!
//! This crate provides the types shared by every medialease crate:
//! - Content sources and their byte providers
//! - Stored media metadata
//! - The error taxonomy
//! - Runtime configuration

pub mod config;
pub mod error;
pub mod source;

pub use config::ResourceConfig;
pub use error::{MediaError, Result};
pub use source::{
    BytesProvider, ContentId, ContentMetadata, ContentObjectId, ContentSource, FileBytes,
    MediaKind, MemoryBytes, SharedSource,
};

/// Default tuning values
pub mod defaults {
    /// Grace window between last release and revocation (ms)
    pub const GRACE_DELAY_MS: u64 = 150;

    /// Hard timeout for thumbnail/duration extraction (ms)
    pub const ISOLATION_TIMEOUT_MS: u64 = 10_000;

    /// Grace window for isolated handles after their operation ends (ms)
    pub const ISOLATION_GRACE_MS: u64 = 100;

    /// Bytes hashed by the content-hash identity key
    pub const HASH_PREFIX_LEN: usize = 64 * 1024; // 64 KB

    /// Staging copy chunk size
    pub const COPY_CHUNK_SIZE: usize = 1024 * 1024; // 1 MB
}
