//! Runtime configuration for the resource manager.

use crate::defaults;
use crate::error::{MediaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Tunables for handle lifetimes, isolation and export staging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Delay between a handle's ref count reaching zero and its revocation.
    pub grace_delay_ms: u64,
    /// Hard timeout for isolated temporary operations.
    pub isolation_timeout_ms: u64,
    /// Delay before an isolated handle is revoked after its operation ends.
    pub isolation_grace_ms: u64,
    /// Prefix length hashed by the content-hash identity key.
    pub hash_prefix_len: usize,
    /// Chunk size for staging writes.
    pub copy_chunk_size: usize,
    /// Directory for staged export copies (None = platform cache dir).
    pub staging_dir: Option<PathBuf>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: defaults::GRACE_DELAY_MS,
            isolation_timeout_ms: defaults::ISOLATION_TIMEOUT_MS,
            isolation_grace_ms: defaults::ISOLATION_GRACE_MS,
            hash_prefix_len: defaults::HASH_PREFIX_LEN,
            copy_chunk_size: defaults::COPY_CHUNK_SIZE,
            staging_dir: None,
        }
    }
}

impl ResourceConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            MediaError::Serialization(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded resource config");
        Ok(config)
    }

    /// Reject values that would break the lifecycle guarantees.
    pub fn validate(&self) -> Result<()> {
        if self.grace_delay_ms == 0 {
            return Err(MediaError::InvalidConfig(
                "grace_delay_ms must be greater than zero".into(),
            ));
        }
        if self.isolation_timeout_ms == 0 {
            return Err(MediaError::InvalidConfig(
                "isolation_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.copy_chunk_size == 0 {
            return Err(MediaError::InvalidConfig(
                "copy_chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn isolation_timeout(&self) -> Duration {
        Duration::from_millis(self.isolation_timeout_ms)
    }

    pub fn isolation_grace(&self) -> Duration {
        Duration::from_millis(self.isolation_grace_ms)
    }

    /// Resolved staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("medialease")
                .join("staging")
        })
    }

    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_isolation_timeout(mut self, timeout: Duration) -> Self {
        self.isolation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }
}
