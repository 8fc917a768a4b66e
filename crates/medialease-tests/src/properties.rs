//! Property tests for the handle lifecycle guarantees.
//!
//! Each case builds its own paused current-thread runtime so timers only
//! fire when the case advances time.

use medialease_core::{ContentSource, ResourceConfig, SharedSource};
use medialease_handles::{HandleTable, HandleUri, MemoryPlatform, StructuralKey};
use medialease_media::MediaResources;
use medialease_store::MemoryStore;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const GRACE_MS: u64 = 150;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("failed to build runtime")
}

fn table() -> (HandleTable, Arc<MemoryPlatform>) {
    let platform = Arc::new(MemoryPlatform::new());
    let table = HandleTable::new(platform.clone(), Duration::from_millis(GRACE_MS)).unwrap();
    (table, platform)
}

fn video(len: usize, mtime: i64) -> SharedSource {
    ContentSource::from_bytes("video.mp4", vec![1u8; len], mtime).shared()
}

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release,
    Sleep(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        3 => Just(Op::Release),
        1 => (1u64..60).prop_map(Op::Sleep),
        1 => Just(Op::Sleep(GRACE_MS * 3)),
    ]
}

proptest! {
    /// A handle stays valid while referenced and through the grace window.
    #[test]
    fn handle_valid_until_released_and_grace_elapsed(ops in prop::collection::vec(op(), 1..40)) {
        paused_runtime().block_on(async {
            let (table, _) = table();
            let source = video(1000, 1);
            let mut held: Option<HandleUri> = None;
            let mut refs = 0u32;
            // Time since refs last reached zero, while a handle is pending.
            let mut idle_ms: Option<u64> = None;

            for op in ops {
                match op {
                    Op::Acquire => {
                        let handle = table.acquire(&source, "player").unwrap();
                        if let (Some(prev), Some(idle)) = (&held, idle_ms) {
                            // Revived inside the window: same handle.
                            if idle + 10 < GRACE_MS {
                                prop_assert_eq!(&handle, prev);
                            }
                        }
                        if refs > 0 {
                            prop_assert_eq!(Some(&handle), held.as_ref());
                        }
                        held = Some(handle);
                        refs += 1;
                        idle_ms = None;
                    }
                    Op::Release => {
                        if let Some(handle) = &held {
                            if refs > 0 {
                                table.release(handle);
                                refs -= 1;
                                if refs == 0 {
                                    idle_ms = Some(0);
                                }
                            }
                        }
                    }
                    Op::Sleep(ms) => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        if let Some(idle) = idle_ms.as_mut() {
                            *idle += ms;
                        }
                    }
                }

                if let Some(handle) = &held {
                    if refs > 0 {
                        prop_assert!(table.is_valid(handle));
                        prop_assert_eq!(table.ref_count(handle), Some(refs));
                    } else if let Some(idle) = idle_ms {
                        if idle + 10 < GRACE_MS {
                            prop_assert!(table.is_valid(handle));
                        } else if idle > GRACE_MS + 10 {
                            prop_assert!(!table.is_valid(handle));
                        }
                    }
                }
            }
            Ok(())
        })?;
    }

    /// Sources differing only in mtime share a key and a live handle.
    #[test]
    fn identity_ignores_mtime(
        len in 1usize..4096,
        name in "[a-z]{1,12}\\.(mp4|mov|wav)",
        mtime_a in any::<i64>(),
        mtime_b in any::<i64>(),
    ) {
        let a = ContentSource::from_bytes(name.clone(), vec![0u8; len], mtime_a).shared();
        let b = ContentSource::from_bytes(name.clone(), vec![0u8; len], mtime_b).shared();
        prop_assert_eq!(StructuralKey::for_source(&a), StructuralKey::for_source(&b));

        let other = ContentSource::from_bytes(name, vec![0u8; len + 1], mtime_a).shared();
        prop_assert_ne!(StructuralKey::for_source(&a), StructuralKey::for_source(&other));

        paused_runtime().block_on(async {
            let (table, platform) = table();
            let ha = table.acquire(&a, "player").unwrap();
            let hb = table.acquire(&b, "timeline").unwrap();
            prop_assert_eq!(&ha, &hb);
            prop_assert_ne!(table.acquire(&other, "player").unwrap(), ha);
            prop_assert_eq!(platform.created_count(), 2);
            Ok(())
        })?;
    }

    /// Final ref count is acquires minus releases, floored at zero.
    #[test]
    fn ref_count_is_conserved(releases_first in prop::collection::vec(any::<bool>(), 0..60)) {
        paused_runtime().block_on(async {
            let (table, _) = table();
            let source = video(64, 1);
            let handle = table.acquire(&source, "player").unwrap();
            let mut expected = 1u32;

            for is_release in releases_first {
                if is_release {
                    table.release(&handle);
                    expected = expected.saturating_sub(1);
                } else {
                    prop_assert_eq!(table.acquire(&source, "player").unwrap(), handle.clone());
                    expected += 1;
                }
            }
            prop_assert_eq!(table.ref_count(&handle), Some(expected));
            Ok(())
        })?;
    }

    /// Isolated operations never invalidate the display handle, however they end.
    #[test]
    fn isolation_never_invalidates_display(outcomes in prop::collection::vec(0u8..3, 1..8)) {
        paused_runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let platform = Arc::new(MemoryPlatform::with_shared_revocation());
            let config = ResourceConfig::default()
                .with_isolation_timeout(Duration::from_secs(1))
                .with_staging_dir(std::env::temp_dir().join("medialease-property-tests"));
            let resources = MediaResources::new(config, store, platform).unwrap();
            let source = video(512, 1);
            let display = resources.obtain_handle(&source, "player").unwrap();

            for outcome in outcomes {
                let _ = resources
                    .run_isolated(&source, "thumbnail", |_| async move {
                        match outcome {
                            0 => Ok(()),
                            1 => Err(medialease_core::MediaError::NotFound("frame".into())),
                            _ => {
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                Ok(())
                            }
                        }
                    })
                    .await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                prop_assert!(resources.table().is_valid(&display));
            }
            Ok(())
        })?;
    }
}
