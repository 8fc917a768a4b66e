//! Integration tests for the handle table.
//!
//! Exercises medialease-handles against stores from medialease-store,
//! where every reload is a new content object with a new mtime.

use medialease_core::{ContentSource, MediaError, SharedSource};
use medialease_handles::{HandleTable, MemoryPlatform, StructuralKey};
use medialease_store::{MediaStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

const GRACE: Duration = Duration::from_millis(150);

// ── Helpers ────────────────────────────────────────────────────

fn table() -> (HandleTable, Arc<MemoryPlatform>) {
    let platform = Arc::new(MemoryPlatform::new());
    let table = HandleTable::new(platform.clone(), GRACE).unwrap();
    (table, platform)
}

fn source(name: &str, len: usize, mtime: i64) -> SharedSource {
    ContentSource::from_bytes(name, vec![7u8; len], mtime).shared()
}

// ── Reference counting & grace ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn repeated_acquire_shares_handle_until_grace_expires() {
    let (table, platform) = table();
    let video = source("video.mp4", 1000, 1);

    let first = table.acquire(&video, "player").unwrap();
    assert_eq!(table.ref_count(&first), Some(1));
    let second = table.acquire(&video, "timeline").unwrap();
    assert_eq!(second, first);
    assert_eq!(table.ref_count(&first), Some(2));

    table.release(&first);
    table.release(&first);
    assert_eq!(table.ref_count(&first), Some(0));
    assert_eq!(table.is_pending_revoke(&first), Some(true));

    tokio::time::sleep(GRACE / 2).await;
    assert!(table.is_valid(&first));
    assert_eq!(platform.revoked_count(), 0);

    tokio::time::sleep(GRACE).await;
    assert!(!table.is_valid(&first));
    assert_eq!(platform.revoked_count(), 1);
    assert!(table.debug_snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn acquire_during_grace_cancels_revoke() {
    let (table, platform) = table();
    let video = source("video.mp4", 1000, 1);

    let handle = table.acquire(&video, "player").unwrap();
    table.release(&handle);
    tokio::time::sleep(GRACE / 2).await;

    assert_eq!(table.acquire(&video, "player").unwrap(), handle);
    tokio::time::sleep(GRACE * 3).await;

    assert!(table.is_valid(&handle));
    assert_eq!(table.ref_count(&handle), Some(1));
    assert_eq!(platform.created_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn over_release_is_clamped() {
    let (table, _) = table();
    let video = source("video.mp4", 10, 1);

    let handle = table.acquire(&video, "player").unwrap();
    table.release(&handle);
    table.release(&handle);
    table.release(&handle);
    assert_eq!(table.ref_count(&handle), Some(0));

    assert_eq!(table.acquire(&video, "player").unwrap(), handle);
    assert_eq!(table.ref_count(&handle), Some(1));
}

// ── Identity across reloads ────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reload_within_grace_reuses_handle() {
    let (table, platform) = table();
    let store = MemoryStore::new();
    let id = store.insert("clip.mp4", vec![3u8; 1000]);

    let before = store.load_content(id).await.unwrap();
    let handle = table.acquire(&before, "player").unwrap();
    table.release(&handle);

    let after = store.load_content(id).await.unwrap();
    assert_ne!(before.unstable_mtime(), after.unstable_mtime());
    assert_ne!(before.content_object_id(), after.content_object_id());

    assert_eq!(table.acquire(&after, "player").unwrap(), handle);
    assert_eq!(platform.created_count(), 1);

    // An unrelated file of a different size never collides.
    let other = source("clip.mp4", 999, 0);
    let other_handle = table.acquire(&other, "player").unwrap();
    assert_ne!(other_handle, handle);
    assert_ne!(
        StructuralKey::for_source(&other),
        StructuralKey::for_source(&after)
    );
}

#[tokio::test(start_paused = true)]
async fn reload_after_grace_gets_clean_handle() {
    let (table, platform) = table();
    let store = MemoryStore::new();
    let id = store.insert("clip.mp4", vec![3u8; 1000]);

    let before = store.load_content(id).await.unwrap();
    let stale = table.acquire(&before, "player").unwrap();
    table.release(&stale);
    tokio::time::sleep(GRACE * 2).await;

    let after = store.load_content(id).await.unwrap();
    let fresh = table.acquire(&after, "player").unwrap();
    assert_ne!(fresh, stale);
    assert!(table.is_valid(&fresh));
    assert_eq!(platform.created_count(), 2);
    assert_eq!(platform.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn same_instance_wins_over_structural_match() {
    let (table, _) = table();
    let a = source("take.mp4", 64, 1);
    let handle = table.acquire(&a, "player").unwrap();

    // Same structural key, different instance and mtime.
    let b = source("take.mp4", 64, 2);
    assert_eq!(table.acquire(&b, "timeline").unwrap(), handle);
    assert_eq!(table.acquire(&a, "player").unwrap(), handle);
    assert_eq!(table.ref_count(&handle), Some(3));
    assert_eq!(table.len(), 1);
}

// ── Failure paths ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_source_never_reaches_platform() {
    let (table, platform) = table();
    let empty = source("empty.mp4", 0, 1);

    let err = table.acquire(&empty, "player").unwrap_err();
    assert!(matches!(err, MediaError::EmptySource { .. }));
    assert!(err.is_not_ready());
    assert_eq!(platform.created_count(), 0);
    assert!(table.is_empty());
}

#[tokio::test(start_paused = true)]
async fn platform_refusal_leaves_no_entry() {
    let (table, platform) = table();
    platform.refuse_creation(Some("quota exceeded".into()));

    let err = table.acquire(&source("clip.mp4", 10, 1), "player").unwrap_err();
    assert!(matches!(err, MediaError::HandleCreationFailed { .. }));
    assert!(table.is_empty());

    platform.refuse_creation(None);
    assert!(table.acquire(&source("clip.mp4", 10, 1), "player").is_ok());
}

#[tokio::test(start_paused = true)]
async fn stale_handle_is_replaced_on_next_acquire() {
    let (table, platform) = table();
    let video = source("clip.mp4", 10, 1);

    let handle = table.acquire(&video, "player").unwrap();
    platform.invalidate(&handle);

    let err = table.validate(&handle).unwrap_err();
    assert!(err.is_stale());

    let fresh = table.acquire(&video, "player").unwrap();
    assert_ne!(fresh, handle);
    assert!(table.is_valid(&fresh));
}

#[tokio::test(start_paused = true)]
async fn force_revoke_ignores_ref_count() {
    let (table, platform) = table();
    let video = source("clip.mp4", 10, 1);

    let handle = table.acquire(&video, "player").unwrap();
    table.acquire(&video, "timeline").unwrap();
    table.force_revoke(&handle).unwrap();

    assert!(!table.is_valid(&handle));
    assert_eq!(platform.live_count(), 0);
    assert!(matches!(
        table.force_revoke(&handle),
        Err(MediaError::UnknownHandle { .. })
    ));

    // The pending timer of a released, then force-revoked handle is harmless.
    let again = table.acquire(&video, "player").unwrap();
    table.release(&again);
    table.force_revoke(&again).unwrap();
    tokio::time::sleep(GRACE * 2).await;
    assert_eq!(platform.revoked_count(), 2);
}

// ── Introspection ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn snapshot_reports_origin_and_pending() {
    let (table, _) = table();
    let a = table.acquire(&source("a.mp4", 10, 1), "player").unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = table.acquire(&source("b.mp4", 20, 1), "thumbnail-strip").unwrap();
    table.release(&b);

    let snapshot = table.debug_snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].handle, a);
    assert_eq!(snapshot[0].origin_tag, "player");
    assert!(!snapshot[0].pending_revoke);
    assert_eq!(snapshot[1].origin_tag, "thumbnail-strip");
    assert!(snapshot[1].pending_revoke);

    let stats = table.stats();
    assert_eq!(stats.live, 2);
    assert_eq!(stats.pending_revoke, 1);
    assert_eq!(stats.created_total, 2);
}

#[tokio::test(start_paused = true)]
async fn revoke_all_empties_platform() {
    let (table, platform) = table();
    for i in 0..5 {
        table
            .acquire(&source(&format!("clip_{i}.mp4"), 10 + i, 1), "player")
            .unwrap();
    }

    assert_eq!(table.revoke_all(), 5);
    assert!(table.is_empty());
    assert_eq!(platform.live_count(), 0);
}
