//! Content-addressed artifact storage on local disk.
//!
//! Entries live at `{root}/{hex[0..2]}/{hex[2..4]}/{hex}`. Writes go to a
//! temporary file in the same shard directory and are renamed into place,
//! so readers never see a partial entry. An entry's modification time is its
//! last-access time: it is set on write and refreshed on every read.

use crate::{Artifact, Cache, Error, Fingerprint, Result};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Prefix `tempfile` uses for in-flight writes.
pub(crate) const TEMP_PREFIX: &str = ".tmp";

/// What a [`LocalStore::put_bytes`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No entry existed.
    Created,
    /// An identical entry already existed; only its access time changed.
    Unchanged,
    /// A different entry existed and was replaced.
    Replaced,
}

/// A stored entry as seen by a directory scan.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key of the entry.
    pub fingerprint: Fingerprint,
    /// Location on disk.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last time the entry was written or read.
    pub last_access: SystemTime,
    /// When the entry was created, where the filesystem records it.
    pub created: SystemTime,
}

/// Result of walking the store.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    pub(crate) entries: Vec<CacheEntry>,
    /// Leftover temporary files with their modification times.
    pub(crate) temp_files: Vec<(PathBuf, SystemTime, u64)>,
}

/// Local disk cache store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create cache directory"))?;
        tracing::debug!(root = %root.display(), "Opened local cache store");
        Ok(Self { root })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk path of an entry.
    #[must_use]
    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        fingerprint.shard_path(&self.root)
    }

    /// Whether an entry exists.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entry_path(fingerprint).is_file()
    }

    /// Read an entry's raw bytes and refresh its access time.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for anything other than a missing entry.
    pub fn get_bytes(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(fingerprint);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        touch(&path);
        Ok(Some(data))
    }

    /// Store raw bytes under `fingerprint`.
    ///
    /// Identical content already present is left in place. Different content
    /// is replaced atomically; the last writer wins.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the entry cannot be written.
    pub fn put_bytes(&self, fingerprint: &Fingerprint, data: &[u8]) -> Result<PutOutcome> {
        let path = self.entry_path(fingerprint);

        let existed = match fs::metadata(&path) {
            Ok(meta) => {
                if meta.len() == data.len() as u64 && fs::read(&path).is_ok_and(|d| d == data) {
                    touch(&path);
                    tracing::debug!(fingerprint = %fingerprint, "Entry already present");
                    return Ok(PutOutcome::Unchanged);
                }
                true
            }
            Err(_) => false,
        };

        let shard = path
            .parent()
            .ok_or_else(|| Error::configuration("cache entry path has no parent"))?;
        fs::create_dir_all(shard).map_err(|e| Error::io(e, shard, "create shard directory"))?;

        let mut tmp = NamedTempFile::new_in(shard).map_err(|e| Error::io(e, shard, "create temp"))?;
        tmp.write_all(data)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, tmp.path(), "sync"))?;
        tmp.persist(&path)
            .map_err(|e| Error::io(e.error, &path, "rename"))?;

        tracing::debug!(
            fingerprint = %fingerprint,
            size = data.len(),
            replaced = existed,
            "Stored cache entry"
        );
        Ok(if existed {
            PutOutcome::Replaced
        } else {
            PutOutcome::Created
        })
    }

    /// Remove an entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for anything other than a missing entry.
    pub fn delete_entry(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let path = self.entry_path(fingerprint);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(e, &path, "remove")),
        }
    }

    /// Read and decode an artifact.
    ///
    /// An entry that fails to decode is removed so the next build replaces it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, or [`Error::Malformed`] for a corrupt entry.
    pub fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>> {
        let Some(bytes) = self.get_bytes(fingerprint)? else {
            return Ok(None);
        };
        match Artifact::decode(&bytes) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Removing corrupt cache entry");
                let _ = self.delete_entry(fingerprint);
                Err(Error::malformed(fingerprint.to_hex(), e.to_string()))
            }
        }
    }

    /// Encode and store an artifact.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if encoding or writing fails.
    pub fn store(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<PutOutcome> {
        let bytes = artifact.encode()?;
        self.put_bytes(fingerprint, &bytes)
    }

    /// All entries currently in the store.
    ///
    /// # Errors
    ///
    /// Returns an I/O error only if the root itself cannot be read.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.scan()?.entries)
    }

    /// Total size of all entries in bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error only if the root itself cannot be read.
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.scan()?.entries.iter().map(|e| e.size).sum())
    }

    /// Walk the shard directories.
    ///
    /// Entries that vanish mid-walk or cannot be stat'ed are skipped; files
    /// that are not named by a fingerprint are ignored.
    pub(crate) fn scan(&self) -> Result<Scan> {
        if let Err(e) = fs::metadata(&self.root) {
            if e.kind() == ErrorKind::NotFound {
                return Ok(Scan::default());
            }
            return Err(Error::io(e, &self.root, "stat cache root"));
        }

        let mut scan = Scan::default();
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable cache path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let name = entry.file_name().to_string_lossy();

            if name.starts_with(TEMP_PREFIX) {
                scan.temp_files.push((entry.path().to_path_buf(), modified, meta.len()));
                continue;
            }
            let Ok(fingerprint) = Fingerprint::from_hex(&name) else {
                tracing::debug!(path = %entry.path().display(), "Ignoring foreign file in cache");
                continue;
            };
            scan.entries.push(CacheEntry {
                fingerprint,
                path: entry.path().to_path_buf(),
                size: meta.len(),
                last_access: modified,
                created: meta.created().unwrap_or(modified),
            });
        }
        Ok(scan)
    }
}

/// Refresh an entry's access time. Failures only cost eviction accuracy.
fn touch(path: &Path) {
    let result = OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        tracing::debug!(path = %path.display(), error = %e, "Failed to update access time");
    }
}

#[async_trait]
impl Cache for LocalStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>> {
        let store = self.clone();
        let fingerprint = *fingerprint;
        tokio::task::spawn_blocking(move || store.load(&fingerprint)).await?
    }

    async fn put(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<()> {
        let store = self.clone();
        let fingerprint = *fingerprint;
        let artifact = artifact.clone();
        tokio::task::spawn_blocking(move || store.store(&fingerprint, &artifact).map(|_| ()))
            .await?
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<()> {
        let store = self.clone();
        let fingerprint = *fingerprint;
        tokio::task::spawn_blocking(move || store.delete_entry(&fingerprint).map(|_| ())).await?
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
