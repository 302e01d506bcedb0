//! End-to-end tests for the local store and cleaner working together.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use kiln_cache::{
    Artifact, ArtifactFile, Cache, CacheMode, ChainCache, Cleaner, CleanerConfig, Fingerprint,
    LocalStore, MemoryCache,
};
use proptest::prelude::*;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn age_entry(store: &LocalStore, fp: &Fingerprint, secs_ago: u64) {
    OpenOptions::new()
        .write(true)
        .open(store.entry_path(fp))
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
        .unwrap();
}

fn artifact(seed: u8, len: usize) -> Artifact {
    Artifact::new(vec![ArtifactFile {
        path: format!("out/{seed}.bin"),
        data: vec![seed; len],
        executable: false,
    }])
    .unwrap()
}

#[tokio::test]
async fn read_protects_entry_from_eviction() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();

    let mut fps = Vec::new();
    for i in 0..6u8 {
        let fp = Fingerprint::digest([i]);
        store.put_bytes(&fp, &[i; 1000]).unwrap();
        age_entry(&store, &fp, 3600 * (10 - u64::from(i)));
        fps.push(fp);
    }

    // the oldest entry is read by a build, which refreshes it
    assert!(store.get_bytes(&fps[0]).unwrap().is_some());

    let cleaner = Cleaner::new(
        store.clone(),
        CleanerConfig::default()
            .with_watermarks(5_000, 3_000)
            .with_min_age(Duration::from_secs(600)),
    )
    .unwrap();
    let stats = cleaner.run_once().unwrap();

    assert_eq!(stats.entries_removed, 3);
    assert!(store.contains(&fps[0]), "recently read entry must survive");
    assert!(!store.contains(&fps[1]));
    assert!(!store.contains(&fps[2]));
    assert!(!store.contains(&fps[3]));
    assert!(store.contains(&fps[4]));
    assert!(store.contains(&fps[5]));
}

#[tokio::test]
async fn evicted_entry_is_refetched_from_remote() {
    let dir = TempDir::new().unwrap();
    let local = LocalStore::open(dir.path()).unwrap();
    let remote = Arc::new(MemoryCache::new());
    let chain = ChainCache::new()
        .with_tier(Arc::new(local.clone()), CacheMode::ReadWrite)
        .with_tier(remote.clone(), CacheMode::ReadWrite);

    let fp = Fingerprint::digest(b"target");
    let stored = artifact(7, 4096);
    chain.put(&fp, &stored).await.unwrap();
    chain.flush().await;
    assert!(local.contains(&fp));
    assert!(remote.contains(&fp));

    age_entry(&local, &fp, 7200);
    let cleaner = Cleaner::new(
        local.clone(),
        CleanerConfig::default()
            .with_watermarks(1, 0)
            .with_min_age(Duration::from_secs(60)),
    )
    .unwrap();
    cleaner.run_once().unwrap();
    assert!(!local.contains(&fp));

    assert_eq!(chain.get(&fp).await.unwrap(), Some(stored));
    assert!(local.contains(&fp), "remote hit should back-fill the local store");
}

#[test]
fn corrupt_entry_is_removed_on_load() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let fp = Fingerprint::digest(b"corrupt");
    store.put_bytes(&fp, b"not an archive").unwrap();

    assert!(store.load(&fp).is_err());
    assert!(!store.contains(&fp));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// After a pass, usage is at or below the low-water mark unless every
    /// remaining entry is too young to evict.
    #[test]
    fn pass_reaches_low_water_mark_or_only_young_remain(
        sizes in prop::collection::vec(1usize..2_000, 1..20),
        young in prop::collection::vec(any::<bool>(), 20),
        low in 0u64..10_000,
    ) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        for (i, size) in sizes.iter().enumerate() {
            let fp = Fingerprint::digest(i.to_le_bytes());
            store.put_bytes(&fp, &vec![0u8; *size]).unwrap();
            if !young[i] {
                age_entry(&store, &fp, 3600 + i as u64);
            }
        }

        let cleaner = Cleaner::new(
            store.clone(),
            CleanerConfig::default()
                .with_watermarks(low, low)
                .with_min_age(Duration::from_secs(600)),
        )
        .unwrap();
        let stats = cleaner.run_once().unwrap();

        let remaining = store.entries().unwrap();
        let total: u64 = remaining.iter().map(|e| e.size).sum();
        prop_assert_eq!(total, stats.final_size);
        if total > low {
            let now = SystemTime::now();
            for entry in &remaining {
                let age = now.duration_since(entry.last_access).unwrap_or_default();
                prop_assert!(age < Duration::from_secs(600));
            }
        }
    }
}
