//! Reference-counted table of live ephemeral handles.
//!
//! Every handle a consumer holds has a [`HandleEntry`] here. When the last
//! holder releases it the entry is marked `pending_revoke` and a timer fires
//! after the grace delay. An `acquire` that lands inside the window revives
//! the entry and bumps its generation, which turns the already-scheduled timer
//! into a no-op.
//!
//! All state sits behind one mutex. Timers hold a `Weak` to the table so a
//! dropped table does not linger until its timers fire.

use crate::identity::{IdentityResolver, InstanceKeys, MatchTier, StructuralKey};
use crate::platform::{HandlePlatform, HandleUri};
use medialease_core::{MediaError, Result, SharedSource};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Bookkeeping for one live handle.
#[derive(Debug)]
pub struct HandleEntry {
    pub handle: HandleUri,
    pub source: SharedSource,
    pub ref_count: u32,
    pub created_at: Instant,
    pub origin_tag: String,
    pub pending_revoke: bool,
    generation: u64,
    /// `None` for isolated entries, which are never indexed.
    key: Option<StructuralKey>,
    instances: InstanceKeys,
}

impl HandleEntry {
    pub fn is_isolated(&self) -> bool {
        self.key.is_none()
    }

    pub fn structural_key(&self) -> Option<&StructuralKey> {
        self.key.as_ref()
    }
}

/// One row of [`HandleTable::debug_snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    pub handle: HandleUri,
    pub ref_count: u32,
    pub origin_tag: String,
    pub age: Duration,
    pub pending_revoke: bool,
    pub isolated: bool,
}

/// Aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub live: usize,
    pub pending_revoke: usize,
    pub created_total: u64,
    pub revoked_total: u64,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<HandleUri, HandleEntry>,
    identity: IdentityResolver,
    next_generation: u64,
    created_total: u64,
    revoked_total: u64,
}

impl TableState {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Remove an entry and every index pointing at it.
    fn unlink(&mut self, handle: &HandleUri) -> Option<HandleEntry> {
        let entry = self.entries.remove(handle)?;
        self.identity
            .forget(handle, entry.key.as_ref(), &entry.instances);
        Some(entry)
    }
}

struct TableShared {
    state: Mutex<TableState>,
    platform: Arc<dyn HandlePlatform>,
    grace_delay: Duration,
    runtime: tokio::runtime::Handle,
}

impl TableShared {
    fn revoke_on_platform(&self, handle: &HandleUri) {
        if let Err(e) = self.platform.revoke(handle) {
            warn!(handle = %handle, error = %e, "Platform revoke failed");
        }
    }

    /// Timer callback: revoke only if nothing revived the entry meanwhile.
    fn revoke_if_current(&self, handle: &HandleUri, generation: u64) {
        let mut state = self.state.lock();
        let current = state.entries.get(handle).is_some_and(|e| {
            e.pending_revoke && e.ref_count == 0 && e.generation == generation
        });
        if !current {
            return;
        }
        if let Some(entry) = state.unlink(handle) {
            state.revoked_total += 1;
            self.revoke_on_platform(handle);
            debug!(
                handle = %handle,
                origin = %entry.origin_tag,
                "Revoked after grace delay"
            );
        }
    }
}

impl Drop for TableShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (handle, _) in state.entries.drain() {
            if let Err(e) = self.platform.revoke(&handle) {
                warn!(handle = %handle, error = %e, "Platform revoke failed on teardown");
            }
        }
    }
}

/// Maps content identity to live handles with ref counts and deferred revocation.
///
/// Cloning is cheap and yields another reference to the same table.
#[derive(Clone)]
pub struct HandleTable {
    shared: Arc<TableShared>,
}

impl HandleTable {
    /// Create a table that schedules revocations on the current Tokio runtime.
    pub fn new(platform: Arc<dyn HandlePlatform>, grace_delay: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MediaError::Runtime(format!("HandleTable needs a Tokio runtime: {e}")))?;
        Ok(Self::with_runtime(platform, grace_delay, runtime))
    }

    /// Create a table that schedules revocations on the given runtime.
    pub fn with_runtime(
        platform: Arc<dyn HandlePlatform>,
        grace_delay: Duration,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            shared: Arc::new(TableShared {
                state: Mutex::new(TableState::default()),
                platform,
                grace_delay,
                runtime,
            }),
        }
    }

    pub fn grace_delay(&self) -> Duration {
        self.shared.grace_delay
    }

    pub fn platform(&self) -> &Arc<dyn HandlePlatform> {
        &self.shared.platform
    }

    /// Acquire a handle for `source`, keyed by its structural key.
    pub fn acquire(&self, source: &SharedSource, origin_tag: &str) -> Result<HandleUri> {
        let key = IdentityResolver::structural_key(source);
        self.acquire_keyed(source, key, origin_tag)
    }

    /// Acquire a handle using a caller-supplied structural key (e.g. a content-hash key).
    ///
    /// Returns the existing entry's handle with its ref count incremented when
    /// one matches, reviving it if it was waiting for revocation. Otherwise
    /// creates a new handle with a ref count of one.
    pub fn acquire_keyed(
        &self,
        source: &SharedSource,
        key: StructuralKey,
        origin_tag: &str,
    ) -> Result<HandleUri> {
        if source.is_empty() {
            return Err(MediaError::EmptySource {
                name: source.display_name().to_string(),
            });
        }

        let mut state = self.shared.state.lock();

        if let Some(found) = state.identity.lookup(source, &key) {
            if self.shared.platform.is_valid(&found.handle) {
                let generation = state.bump_generation();
                let TableState {
                    entries, identity, ..
                } = &mut *state;
                if let Some(entry) = entries.get_mut(&found.handle) {
                    if entry.pending_revoke {
                        entry.pending_revoke = false;
                        entry.generation = generation;
                        debug!(handle = %entry.handle, origin = origin_tag, "Revived pending handle");
                    }
                    entry.ref_count += 1;
                    if found.tier == MatchTier::Structural {
                        identity.prune_dead(&mut entry.instances);
                        let instance = identity.register_instance(source, &entry.handle);
                        if !entry.instances.contains(&instance) {
                            entry.instances.push(instance);
                        }
                    }
                    debug!(
                        handle = %entry.handle,
                        ref_count = entry.ref_count,
                        tier = ?found.tier,
                        "Reused handle"
                    );
                    return Ok(entry.handle.clone());
                }
                warn!(handle = %found.handle, "Identity index pointed at a missing entry");
                identity.forget(&found.handle, Some(&key), &[]);
            } else {
                warn!(handle = %found.handle, "Dropping entry the platform reports invalid");
                if state.unlink(&found.handle).is_some() {
                    state.revoked_total += 1;
                    self.shared.revoke_on_platform(&found.handle);
                }
            }
        }

        let handle = self.create_on_platform(source)?;
        let instance = state.identity.register(source, &key, &handle);
        let mut instances = InstanceKeys::new();
        instances.push(instance);
        let generation = state.bump_generation();
        state.entries.insert(
            handle.clone(),
            HandleEntry {
                handle: handle.clone(),
                source: Arc::clone(source),
                ref_count: 1,
                created_at: Instant::now(),
                origin_tag: origin_tag.to_string(),
                pending_revoke: false,
                generation,
                key: Some(key),
                instances,
            },
        );
        state.created_total += 1;
        debug!(handle = %handle, name = source.display_name(), origin = origin_tag, "Created handle");
        Ok(handle)
    }

    /// Acquire a private handle that is tracked here but never indexed, so no
    /// other consumer can be handed it.
    pub fn acquire_isolated(&self, source: &SharedSource, origin_tag: &str) -> Result<HandleUri> {
        if source.is_empty() {
            return Err(MediaError::EmptySource {
                name: source.display_name().to_string(),
            });
        }

        let mut state = self.shared.state.lock();
        let handle = self.create_on_platform(source)?;
        let generation = state.bump_generation();
        state.entries.insert(
            handle.clone(),
            HandleEntry {
                handle: handle.clone(),
                source: Arc::clone(source),
                ref_count: 1,
                created_at: Instant::now(),
                origin_tag: origin_tag.to_string(),
                pending_revoke: false,
                generation,
                key: None,
                instances: InstanceKeys::new(),
            },
        );
        state.created_total += 1;
        debug!(handle = %handle, origin = origin_tag, "Created isolated handle");
        Ok(handle)
    }

    fn create_on_platform(&self, source: &SharedSource) -> Result<HandleUri> {
        self.shared
            .platform
            .create(source)
            .map_err(|e| MediaError::HandleCreationFailed {
                name: source.display_name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Release one reference. At zero the handle is revoked after the grace delay.
    pub fn release(&self, handle: &HandleUri) {
        self.release_after(handle, self.shared.grace_delay);
    }

    /// Release one reference with an explicit grace delay.
    ///
    /// Releasing more often than acquiring is logged and clamped at zero.
    pub fn release_after(&self, handle: &HandleUri, delay: Duration) {
        let mut state = self.shared.state.lock();
        let generation = state.bump_generation();
        let Some(entry) = state.entries.get_mut(handle) else {
            warn!(handle = %handle, "Release of unknown handle ignored");
            return;
        };

        if entry.ref_count == 0 {
            warn!(
                handle = %handle,
                origin = %entry.origin_tag,
                "Release with ref count already zero; clamped"
            );
            return;
        }

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            debug!(handle = %handle, ref_count = entry.ref_count, "Released reference");
            return;
        }

        entry.pending_revoke = true;
        entry.generation = generation;
        debug!(handle = %handle, delay_ms = delay.as_millis() as u64, "Scheduled revoke");
        drop(state);
        self.schedule_revoke(handle.clone(), generation, delay);
    }

    fn schedule_revoke(&self, handle: HandleUri, generation: u64, delay: Duration) {
        let shared: Weak<TableShared> = Arc::downgrade(&self.shared);
        self.shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.revoke_if_current(&handle, generation);
            }
        });
    }

    /// Revoke immediately regardless of ref count. For hard failure recovery.
    pub fn force_revoke(&self, handle: &HandleUri) -> Result<()> {
        let mut state = self.shared.state.lock();
        let entry = state
            .unlink(handle)
            .ok_or_else(|| MediaError::UnknownHandle {
                handle: handle.to_string(),
            })?;
        state.revoked_total += 1;
        self.shared.revoke_on_platform(handle);
        debug!(
            handle = %handle,
            ref_count = entry.ref_count,
            origin = %entry.origin_tag,
            "Force revoked"
        );
        Ok(())
    }

    /// Check a handle with the platform. A handle the platform no longer
    /// accepts is force-revoked so it is never handed out again.
    pub fn validate(&self, handle: &HandleUri) -> Result<()> {
        if !self.shared.state.lock().entries.contains_key(handle) {
            return Err(MediaError::UnknownHandle {
                handle: handle.to_string(),
            });
        }
        if self.shared.platform.is_valid(handle) {
            return Ok(());
        }
        warn!(handle = %handle, "Platform reports stale handle");
        // Another caller may have revoked it already; either way it is gone.
        let _ = self.force_revoke(handle);
        Err(MediaError::StaleHandleAccess {
            handle: handle.to_string(),
        })
    }

    /// Whether the handle has an entry and the platform accepts it.
    pub fn is_valid(&self, handle: &HandleUri) -> bool {
        self.shared.state.lock().entries.contains_key(handle)
            && self.shared.platform.is_valid(handle)
    }

    pub fn ref_count(&self, handle: &HandleUri) -> Option<u32> {
        self.shared
            .state
            .lock()
            .entries
            .get(handle)
            .map(|e| e.ref_count)
    }

    pub fn is_pending_revoke(&self, handle: &HandleUri) -> Option<bool> {
        self.shared
            .state
            .lock()
            .entries
            .get(handle)
            .map(|e| e.pending_revoke)
    }

    /// Structural key the entry is indexed under (None for isolated or unknown handles).
    pub fn structural_key(&self, handle: &HandleUri) -> Option<StructuralKey> {
        self.shared
            .state
            .lock()
            .entries
            .get(handle)
            .and_then(|e| e.structural_key().cloned())
    }

    /// Read-only view of every entry, oldest first.
    pub fn debug_snapshot(&self) -> Vec<SnapshotEntry> {
        let state = self.shared.state.lock();
        let now = Instant::now();
        let mut rows: Vec<_> = state
            .entries
            .values()
            .map(|e| SnapshotEntry {
                handle: e.handle.clone(),
                ref_count: e.ref_count,
                origin_tag: e.origin_tag.clone(),
                age: now.saturating_duration_since(e.created_at),
                pending_revoke: e.pending_revoke,
                isolated: e.is_isolated(),
            })
            .collect();
        rows.sort_by(|a, b| b.age.cmp(&a.age).then_with(|| a.handle.cmp(&b.handle)));
        rows
    }

    pub fn stats(&self) -> TableStats {
        let state = self.shared.state.lock();
        TableStats {
            live: state.entries.len(),
            pending_revoke: state.entries.values().filter(|e| e.pending_revoke).count(),
            created_total: state.created_total,
            revoked_total: state.revoked_total,
        }
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revoke every entry now. Used on shutdown.
    pub fn revoke_all(&self) -> usize {
        let mut state = self.shared.state.lock();
        let handles: Vec<HandleUri> = state.entries.keys().cloned().collect();
        for handle in &handles {
            if state.unlink(handle).is_some() {
                state.revoked_total += 1;
                self.shared.revoke_on_platform(handle);
            }
        }
        debug!(count = handles.len(), "Revoked all handles");
        handles.len()
    }
}
