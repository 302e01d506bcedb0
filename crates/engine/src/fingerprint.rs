//! Target fingerprinting
//!
//! A fingerprint is the SHA-256 of a canonical JSON envelope holding
//! everything that can change a target's outputs: the content of its
//! sources, its action, its declared outputs and config, and the
//! fingerprints of its direct dependencies. The target's own label is not
//! part of it, so two identical targets share cache entries.

use crate::{Error, Result};
use kiln_cache::Fingerprint;
use kiln_graph::{Action, Label, Target};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Bumped whenever the envelope layout changes, invalidating old entries.
pub const FINGERPRINT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum SourceDigest {
    File(String),
    /// `(relative path, content digest)` for every file, sorted by path
    Directory(Vec<(String, String)>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    version: u32,
    sources: Vec<SourceDigest>,
    action: &'a Action,
    outputs: &'a [String],
    test: bool,
    config: &'a BTreeMap<String, String>,
    deps: Vec<(String, String)>,
}

/// Computes target fingerprints against a workspace.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    workspace_root: PathBuf,
}

impl Fingerprinter {
    /// Fingerprint sources relative to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    /// Workspace root used to resolve sources.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Fingerprint `target` given its dependencies' fingerprints.
    ///
    /// `deps` must hold an entry for every dependency of `target`; extra
    /// entries are ignored. Dependencies are hashed in label order, whatever
    /// their declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a dependency
    /// fingerprint is missing.
    pub fn fingerprint(&self, target: &Target, deps: &BTreeMap<Label, Fingerprint>) -> Result<Fingerprint> {
        let mut dep_digests = BTreeMap::new();
        for dep in &target.deps {
            let fp = deps.get(dep).ok_or_else(|| Error::MissingDependencyFingerprint {
                label: target.label.clone(),
                dependency: dep.clone(),
            })?;
            dep_digests.insert(dep.clone(), fp.to_hex());
        }

        let sources = target
            .sources
            .iter()
            .map(|source| self.source_digest(&target.label, source))
            .collect::<Result<Vec<_>>>()?;

        let envelope = Envelope {
            version: FINGERPRINT_VERSION,
            sources,
            action: &target.action,
            outputs: &target.outputs,
            test: target.test,
            config: &target.config,
            deps: dep_digests
                .into_iter()
                .map(|(label, fp)| (label.to_string(), fp))
                .collect(),
        };

        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| Error::serialization(format!("Failed to encode fingerprint envelope: {e}")))?;
        let fingerprint = Fingerprint::digest(bytes);
        tracing::trace!(label = %target.label, fingerprint = %fingerprint, "Computed fingerprint");
        Ok(fingerprint)
    }

    fn source_digest(&self, label: &Label, source: &Path) -> Result<SourceDigest> {
        let path = self.workspace_root.join(source);
        let meta = std::fs::metadata(&path).map_err(|e| Error::unreadable_source(label, &path, e))?;
        if !meta.is_dir() {
            return hash_file(&path)
                .map(SourceDigest::File)
                .map_err(|e| Error::unreadable_source(label, &path, e));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&path).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                Error::unreadable_source(label, &path, io)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&path)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let digest = hash_file(entry.path()).map_err(|e| Error::unreadable_source(label, entry.path(), e))?;
            files.push((relative, digest));
        }
        Ok(SourceDigest::Directory(files))
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
