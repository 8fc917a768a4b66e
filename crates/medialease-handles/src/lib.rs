//! medialease handles - ephemeral handle lifecycle
//!
//! This crate handles:
//! - The host platform contract for creating/revoking handles
//! - Two-tier content identity (instance + structural key)
//! - The ref-counted handle table with cancellable deferred revocation

pub mod identity;
pub mod platform;
pub mod table;

pub use identity::{IdentityMatch, IdentityResolver, InstanceKey, MatchTier, StructuralKey};
pub use platform::{HandlePlatform, HandleUri, MemoryPlatform, PlatformError};
pub use table::{HandleEntry, HandleTable, SnapshotEntry, TableStats};
