//! Build artifacts and their archive encoding.
//!
//! An artifact is the set of files a build action produced, stored as a
//! zstd-compressed tar. Entry headers carry no timestamps or ownership, so
//! the same files always encode to the same bytes.

use crate::{Error, Result};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const ZSTD_LEVEL: i32 = 3;

/// One output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// Path relative to the target's output directory, `/`-separated.
    pub path: String,
    /// File contents.
    pub data: Vec<u8>,
    /// Whether the file is executable.
    pub executable: bool,
}

/// Output files of one build, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    files: Vec<ArtifactFile>,
}

impl Artifact {
    /// Build an artifact from files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a path is absolute, escapes the
    /// output directory, or appears twice.
    pub fn new(mut files: Vec<ArtifactFile>) -> Result<Self> {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        for file in &files {
            check_relative(&file.path)?;
        }
        if let Some(pair) = files.windows(2).find(|w| w[0].path == w[1].path) {
            return Err(Error::malformed(
                "artifact",
                format!("duplicate path '{}'", pair[0].path),
            ));
        }
        Ok(Self { files })
    }

    /// Read declared outputs from disk.
    ///
    /// Each output is a path relative to `root`. Directories are included
    /// recursively.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if an output is missing or unreadable.
    pub fn collect(root: &Path, outputs: &[String]) -> Result<Self> {
        let mut files = Vec::new();
        for output in outputs {
            check_relative(output)?;
            let path = root.join(output);
            let meta = fs::metadata(&path).map_err(|e| Error::io(e, &path, "stat output"))?;
            if meta.is_dir() {
                for entry in WalkDir::new(&path).sort_by_file_name() {
                    let entry = entry.map_err(|e| {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                        Error::io(e.into(), path, "walk output")
                    })?;
                    if entry.file_type().is_file() {
                        files.push(read_file(root, entry.path())?);
                    }
                }
            } else {
                files.push(read_file(root, &path)?);
            }
        }
        // overlapping outputs ("out" and "out/a") yield the same file twice
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        Self::new(files)
    }

    /// Write every file under `root`, replacing existing files.
    ///
    /// Returns the paths written.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a file cannot be written.
    pub fn materialize(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let dest = root.join(&file.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create directory"))?;
            }
            fs::write(&dest, &file.data).map_err(|e| Error::io(e, &dest, "write"))?;
            set_executable(&dest, file.executable)?;
            written.push(dest);
        }
        Ok(written)
    }

    /// Encode as a zstd-compressed tar archive.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the archive cannot be built.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        for file in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(file.data.len() as u64);
            header.set_mode(if file.executable { 0o755 } else { 0o644 });
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, &file.path, file.data.as_slice())
                .map_err(|e| Error::io_no_path(e, "append to archive"))?;
        }
        let tar = builder
            .into_inner()
            .map_err(|e| Error::io_no_path(e, "finish archive"))?;
        zstd::encode_all(tar.as_slice(), ZSTD_LEVEL).map_err(|e| Error::io_no_path(e, "compress"))
    }

    /// Decode an archive produced by [`Artifact::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the bytes are not a valid archive.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let malformed = |msg: String| Error::malformed("artifact", msg);
        let tar = zstd::decode_all(bytes).map_err(|e| malformed(format!("zstd: {e}")))?;
        let mut archive = tar::Archive::new(tar.as_slice());
        let mut files = Vec::new();
        for entry in archive.entries().map_err(|e| malformed(format!("tar: {e}")))? {
            let mut entry = entry.map_err(|e| malformed(format!("tar entry: {e}")))?;
            if entry.header().entry_type() != tar::EntryType::Regular {
                continue;
            }
            let path = entry
                .path()
                .map_err(|e| malformed(format!("entry path: {e}")))?
                .to_string_lossy()
                .into_owned();
            let executable = entry.header().mode().map(|m| m & 0o111 != 0).unwrap_or(false);
            let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
            entry
                .read_to_end(&mut data)
                .map_err(|e| malformed(format!("entry data: {e}")))?;
            files.push(ArtifactFile {
                path,
                data,
                executable,
            });
        }
        Self::new(files)
    }

    /// Files in path order.
    #[must_use]
    pub fn files(&self) -> &[ArtifactFile] {
        &self.files
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the artifact has no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total uncompressed size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.files.iter().map(|f| f.data.len() as u64).sum()
    }
}

fn check_relative(path: &str) -> Result<()> {
    let ok = !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(())
    } else {
        Err(Error::malformed(
            "artifact",
            format!("path '{path}' must be relative and stay inside the output directory"),
        ))
    }
}

fn read_file(root: &Path, path: &Path) -> Result<ArtifactFile> {
    let data = fs::read(path).map_err(|e| Error::io(e, path, "read output"))?;
    let rel = path.strip_prefix(root).unwrap_or(path);
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok(ArtifactFile {
        path: rel,
        data,
        executable: is_executable(path),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io(e, path, "set permissions"))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(path: &str, data: &[u8]) -> ArtifactFile {
        ArtifactFile {
            path: path.to_string(),
            data: data.to_vec(),
            executable: false,
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = Artifact::new(vec![file("b.txt", b"two"), file("a.txt", b"one")]).unwrap();
        let b = Artifact::new(vec![file("a.txt", b"one"), file("b.txt", b"two")]).unwrap();
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn decode_restores_files_and_modes() {
        let mut bin = file("bin/tool", b"#!/bin/sh\n");
        bin.executable = true;
        let artifact = Artifact::new(vec![bin, file("lib/x.a", &[0, 1, 2, 255])]).unwrap();

        let decoded = Artifact::decode(&artifact.encode().unwrap()).unwrap();
        assert_eq!(decoded, artifact);
        assert!(decoded.files()[0].executable);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Artifact::decode(b"definitely not zstd").unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(Artifact::new(vec![file("../etc/passwd", b"")]).is_err());
        assert!(Artifact::new(vec![file("/abs", b"")]).is_err());
        assert!(Artifact::new(vec![file("a", b""), file("a", b"")]).is_err());
    }

    #[test]
    fn collect_and_materialize_round_trip() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("out/nested")).unwrap();
        fs::write(src.path().join("out/nested/one.txt"), b"1").unwrap();
        fs::write(src.path().join("out/two.txt"), b"2").unwrap();
        fs::write(src.path().join("single.bin"), b"bin").unwrap();

        let artifact =
            Artifact::collect(src.path(), &["out".to_string(), "single.bin".to_string()]).unwrap();
        let paths: Vec<&str> = artifact.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["out/nested/one.txt", "out/two.txt", "single.bin"]);

        let dest = TempDir::new().unwrap();
        let written = artifact.materialize(dest.path()).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(fs::read(dest.path().join("out/nested/one.txt")).unwrap(), b"1");
        assert_eq!(fs::read(dest.path().join("single.bin")).unwrap(), b"bin");
    }

    #[test]
    fn collect_missing_output_fails() {
        let src = TempDir::new().unwrap();
        let err = Artifact::collect(src.path(), &["nope".to_string()]).unwrap_err();
        assert!(err.is_not_found());
    }
}
