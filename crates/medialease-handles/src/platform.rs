//! Host platform contract for creating and revoking ephemeral handles.
//!
//! The table never talks to the platform except through [`HandlePlatform`].
//! [`MemoryPlatform`] is the in-process implementation used by the app and by
//! tests; it can model the shared-revocation quirk some hosts exhibit.

use medialease_core::{ContentObjectId, SharedSource};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

/// Opaque ephemeral handle (a `blob:`-style URI). Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleUri(Arc<str>);

impl HandleUri {
    pub fn new(uri: impl AsRef<str>) -> Self {
        Self(Arc::from(uri.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandleUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by the host platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform refused handle: {0}")]
    Refused(String),

    #[error("platform does not know handle {0}")]
    UnknownHandle(HandleUri),
}

/// Creates, revokes and validates ephemeral handles on the host.
pub trait HandlePlatform: Send + Sync {
    /// Create a new handle for the source's bytes.
    fn create(&self, source: &SharedSource) -> Result<HandleUri, PlatformError>;

    /// Revoke a handle. Further use of it fails.
    fn revoke(&self, handle: &HandleUri) -> Result<(), PlatformError>;

    /// Whether the handle can still be used to read content.
    fn is_valid(&self, handle: &HandleUri) -> bool;
}

struct LiveHandle {
    object: ContentObjectId,
    valid: bool,
    // The platform keeps the content alive for as long as the handle exists.
    _source: SharedSource,
}

#[derive(Default)]
struct PlatformState {
    live: HashMap<HandleUri, LiveHandle>,
    created: u64,
    revoked: u64,
    refuse: Option<String>,
}

/// In-process handle platform.
pub struct MemoryPlatform {
    state: Mutex<PlatformState>,
    shared_revocation: bool,
}

impl MemoryPlatform {
    /// Platform where each handle is independent.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState::default()),
            shared_revocation: false,
        }
    }

    /// Platform where revoking any handle invalidates every other handle
    /// created from the same underlying content object.
    pub fn with_shared_revocation() -> Self {
        Self {
            state: Mutex::new(PlatformState::default()),
            shared_revocation: true,
        }
    }

    /// Make subsequent `create` calls fail (or succeed again with `None`).
    pub fn refuse_creation(&self, reason: Option<String>) {
        self.state.lock().refuse = reason;
    }

    /// Mark a handle unusable without revoking it, as a host does when the
    /// backing content changes underneath it.
    pub fn invalidate(&self, handle: &HandleUri) {
        if let Some(live) = self.state.lock().live.get_mut(handle) {
            live.valid = false;
        }
    }

    /// Handles created so far.
    pub fn created_count(&self) -> u64 {
        self.state.lock().created
    }

    /// Handles revoked so far.
    pub fn revoked_count(&self) -> u64 {
        self.state.lock().revoked
    }

    /// Handles created and not yet revoked.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlePlatform for MemoryPlatform {
    fn create(&self, source: &SharedSource) -> Result<HandleUri, PlatformError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.refuse {
            return Err(PlatformError::Refused(reason.clone()));
        }

        let handle = HandleUri::new(format!("blob:medialease/{}", Uuid::new_v4()));
        state.live.insert(
            handle.clone(),
            LiveHandle {
                object: source.content_object_id(),
                valid: true,
                _source: Arc::clone(source),
            },
        );
        state.created += 1;
        trace!(handle = %handle, name = source.display_name(), "platform: create");
        Ok(handle)
    }

    fn revoke(&self, handle: &HandleUri) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        let removed = state
            .live
            .remove(handle)
            .ok_or_else(|| PlatformError::UnknownHandle(handle.clone()))?;
        state.revoked += 1;

        if self.shared_revocation {
            for live in state.live.values_mut() {
                if live.object == removed.object {
                    live.valid = false;
                }
            }
        }
        trace!(handle = %handle, "platform: revoke");
        Ok(())
    }

    fn is_valid(&self, handle: &HandleUri) -> bool {
        self.state
            .lock()
            .live
            .get(handle)
            .is_some_and(|live| live.valid)
    }
}
