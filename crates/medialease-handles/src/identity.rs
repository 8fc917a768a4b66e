//! Two-tier identity for content sources.
//!
//! Tier one is the instance index: the exact `Arc<ContentSource>` allocation a
//! consumer passes in, tracked through a `Weak` so the index never keeps the
//! payload alive. Tier two is the structural index keyed by
//! `byte_length-display_name`. The modification time is left out of the key
//! because the store re-stamps it on every load.

use crate::platform::HandleUri;
use medialease_core::{ContentSource, SharedSource};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};

/// Identity key built only from attributes that survive a reload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructuralKey(String);

impl StructuralKey {
    /// `byte_length-display_name`.
    pub fn for_source(source: &ContentSource) -> Self {
        Self::from_parts(source.byte_length(), source.display_name())
    }

    /// The key a source with these attributes would have, without loading it.
    pub fn from_parts(byte_length: u64, display_name: &str) -> Self {
        Self(format!("{byte_length}-{display_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StructuralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a `ContentSource` allocation registered in the instance index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceKey(usize);

impl InstanceKey {
    pub fn of(source: &SharedSource) -> Self {
        Self(Arc::as_ptr(source) as usize)
    }
}

/// Instance keys registered for one handle.
pub type InstanceKeys = SmallVec<[InstanceKey; 2]>;

/// Which tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Instance,
    Structural,
}

/// Result of an identity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMatch {
    pub handle: HandleUri,
    pub tier: MatchTier,
}

struct InstanceSlot {
    // Holding the Weak pins the allocation, so the address cannot be reused
    // by another source while the slot exists.
    source: Weak<ContentSource>,
    handle: HandleUri,
}

/// Instance and structural indexes. Owned by the handle table, which keeps
/// them consistent with its entries.
#[derive(Default)]
pub struct IdentityResolver {
    instances: HashMap<InstanceKey, InstanceSlot>,
    structural: HashMap<StructuralKey, HandleUri>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Structural key for a source.
    pub fn structural_key(source: &ContentSource) -> StructuralKey {
        StructuralKey::for_source(source)
    }

    /// Stronger structural key that also covers a hash of the first
    /// `prefix_len` bytes. Costs an async read.
    pub async fn content_key(source: &ContentSource, prefix_len: usize) -> io::Result<StructuralKey> {
        let prefix = source.read_range(0, prefix_len).await?;
        let digest = blake3::hash(&prefix).to_hex();
        Ok(StructuralKey(format!(
            "{}-{}-{}",
            source.byte_length(),
            source.display_name(),
            &digest.as_str()[..16]
        )))
    }

    /// Find the handle for a source: exact instance first, then structural key.
    pub fn lookup(&self, source: &SharedSource, key: &StructuralKey) -> Option<IdentityMatch> {
        if let Some(slot) = self.instances.get(&InstanceKey::of(source)) {
            if std::ptr::eq(slot.source.as_ptr(), Arc::as_ptr(source)) {
                return Some(IdentityMatch {
                    handle: slot.handle.clone(),
                    tier: MatchTier::Instance,
                });
            }
        }
        self.structural.get(key).map(|handle| IdentityMatch {
            handle: handle.clone(),
            tier: MatchTier::Structural,
        })
    }

    /// Index a newly created handle under both tiers.
    pub fn register(
        &mut self,
        source: &SharedSource,
        key: &StructuralKey,
        handle: &HandleUri,
    ) -> InstanceKey {
        self.structural.insert(key.clone(), handle.clone());
        self.register_instance(source, handle)
    }

    /// Add another instance (e.g. a reload of the same content) for an existing handle.
    pub fn register_instance(&mut self, source: &SharedSource, handle: &HandleUri) -> InstanceKey {
        let key = InstanceKey::of(source);
        self.instances.insert(
            key,
            InstanceSlot {
                source: Arc::downgrade(source),
                handle: handle.clone(),
            },
        );
        key
    }

    /// Drop instance slots in `keys` whose source has been freed.
    pub fn prune_dead(&mut self, keys: &mut InstanceKeys) {
        keys.retain(|key| match self.instances.get(key) {
            Some(slot) if slot.source.strong_count() > 0 => true,
            Some(_) => {
                self.instances.remove(key);
                false
            }
            None => false,
        });
    }

    /// Remove every index entry that points at `handle`.
    pub fn forget(&mut self, handle: &HandleUri, key: Option<&StructuralKey>, keys: &[InstanceKey]) {
        if let Some(key) = key {
            if self.structural.get(key) == Some(handle) {
                self.structural.remove(key);
            }
        }
        for key in keys {
            if self
                .instances
                .get(key)
                .is_some_and(|slot| &slot.handle == handle)
            {
                self.instances.remove(key);
            }
        }
    }

    /// Whether any index still refers to `handle`.
    pub fn references(&self, handle: &HandleUri) -> bool {
        self.structural.values().any(|h| h == handle)
            || self.instances.values().any(|slot| &slot.handle == handle)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn structural_count(&self) -> usize {
        self.structural.len()
    }
}
