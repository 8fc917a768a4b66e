//! Integration tests for lazy loading.
//!
//! Exercises medialease-media's loader over both stores and checks that
//! metadata-only consumers never create handles.

use medialease_core::ResourceConfig;
use medialease_handles::MemoryPlatform;
use medialease_media::MediaResources;
use medialease_store::{DirectoryStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

fn resources(store: Arc<MemoryStore>, platform: Arc<MemoryPlatform>) -> MediaResources {
    let config = ResourceConfig::default()
        .with_staging_dir(std::env::temp_dir().join("medialease-loader-tests"));
    MediaResources::new(config, store, platform).unwrap()
}

#[tokio::test(start_paused = true)]
async fn cleanup_scan_of_fifty_items_creates_no_handles() {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new());
    for i in 0..50 {
        store.insert(format!("clip_{i:02}.mp4"), vec![1u8; 100 + i]);
    }
    let resources = resources(store.clone(), platform.clone());

    let items = resources.loader().scan_library().await.unwrap();
    assert_eq!(items.len(), 50);
    for item in &items {
        resources.loader().load_metadata(item.id).await.unwrap();
    }

    assert_eq!(resources.debug_snapshot().len(), 0);
    assert_eq!(platform.created_count(), 0);
    assert_eq!(store.content_loads(), 0);
}

#[tokio::test(start_paused = true)]
async fn housekeeping_finds_broken_items_without_handles() {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new());
    let healthy = store.insert("healthy.mp4", vec![1u8; 100]);
    store.insert("empty.mp4", Vec::<u8>::new());
    store.insert_missing("evicted.mp4", 2048);
    let resources = resources(store, platform.clone());

    let flagged = resources.loader().find_needing_attention().await.unwrap();
    assert_eq!(flagged.len(), 2);
    assert!(flagged.iter().all(|m| m.id != healthy));
    assert_eq!(platform.created_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn handles_only_on_explicit_request() {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new());
    let id = store.insert("clip.mp4", vec![1u8; 100]);
    let resources = resources(store, platform.clone());

    let source = resources.loader().load_source(id).await.unwrap();
    assert_eq!(platform.created_count(), 0);

    let handle = resources.obtain_handle(&source, "player").unwrap();
    assert_eq!(platform.created_count(), 1);

    resources.release_handle(&handle, "player");
    tokio::time::sleep(resources.config().grace_delay() * 2).await;
    assert!(resources.debug_snapshot().is_empty());
    assert_eq!(platform.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reloaded_item_reuses_display_handle() {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new());
    let id = store.insert("clip.mp4", vec![1u8; 1000]);
    let resources = resources(store, platform.clone());
    let loader = resources.loader();

    let (_, handle) = loader.open(id, "player").await.unwrap();
    loader.release_handle(&handle, "player");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (_, again) = loader.open(id, "player").await.unwrap();
    assert_eq!(again, handle);
    assert_eq!(platform.created_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_handle_recovery_keeps_one_entry() {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new());
    let id = store.insert("clip.mp4", vec![1u8; 100]);
    let resources = resources(store, platform.clone());
    let loader = resources.loader();

    let source = loader.load_source(id).await.unwrap();
    let handle = loader.obtain_handle(&source, "player").unwrap();
    platform.invalidate(&handle);

    let fresh = loader.ensure_usable(&handle, &source, "player").unwrap();
    assert_ne!(fresh, handle);
    assert_eq!(resources.debug_snapshot().len(), 1);

    // Releasing the stale handle afterwards is a logged no-op.
    loader.release_handle(&handle, "player");
    assert_eq!(resources.table().ref_count(&fresh), Some(1));
}

#[tokio::test(start_paused = true)]
async fn both_holders_recover_from_one_stale_handle() {
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new());
    let id = store.insert("clip.mp4", vec![1u8; 100]);
    let resources = resources(store, platform.clone());
    let loader = resources.loader();

    let source = loader.load_source(id).await.unwrap();
    let player = loader.obtain_handle(&source, "player").unwrap();
    let timeline = loader.obtain_handle(&source, "timeline").unwrap();
    assert_eq!(player, timeline);
    platform.invalidate(&player);

    let fresh_player = loader.ensure_usable(&player, &source, "player").unwrap();
    // The timeline still holds the handle the player's recovery retired.
    let fresh_timeline = loader.ensure_usable(&timeline, &source, "timeline").unwrap();
    assert_ne!(fresh_player, player);
    assert_eq!(fresh_timeline, fresh_player);
    assert_eq!(resources.table().ref_count(&fresh_player), Some(2));
    assert_eq!(resources.debug_snapshot().len(), 1);
    assert_eq!(platform.created_count(), 2);
}

#[tokio::test]
async fn directory_store_scan_creates_no_handles() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let store = Arc::new(DirectoryStore::open(tmp.path().join("store")).await.unwrap());
    for i in 0..5 {
        store
            .import(&format!("clip_{i}.mp4"), &vec![2u8; 64 + i])
            .await
            .unwrap();
    }
    let platform = Arc::new(MemoryPlatform::new());
    let config = ResourceConfig::default().with_staging_dir(tmp.path().join("staging"));
    let resources = MediaResources::new(config, store, platform.clone()).unwrap();

    let items = resources.loader().scan_library().await.unwrap();
    assert_eq!(items.len(), 5);
    assert!(items.iter().all(|m| m.has_content && !m.needs_attention()));
    assert_eq!(platform.created_count(), 0);
}
