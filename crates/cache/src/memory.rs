//! In-process cache backend.

use crate::{Artifact, Cache, Fingerprint, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cache held in memory for the lifetime of the process.
///
/// Useful as a fast front tier and as a fake in tests; it also counts
/// operations so tests can assert on traffic.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Fingerprint, Artifact>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |m| m.len())
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `fingerprint` is stored.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .read()
            .is_ok_and(|m| m.contains_key(fingerprint))
    }

    /// Number of `get` calls served so far.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `put` calls served so far.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .read()
            .ok()
            .and_then(|m| m.get(fingerprint).cloned()))
    }

    async fn put(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.entries.write() {
            m.insert(*fingerprint, artifact.clone());
        }
        Ok(())
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<()> {
        if let Ok(mut m) = self.entries.write() {
            m.remove(fingerprint);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
