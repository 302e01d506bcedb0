//! Declared output directories

use crate::ExecutionError;
use kiln_graph::Label;
use std::path::Path;

/// Create `workdir` and remove every declared output left in it, so that
/// neither an action nor a cache restore leaves stale files behind.
///
/// Outputs that would resolve outside `workdir` are refused before anything
/// is touched.
pub(crate) async fn clear_outputs(
    label: &Label,
    workdir: &Path,
    outputs: &[String],
) -> Result<(), ExecutionError> {
    for declared in outputs {
        kiln_graph::check_output(declared).map_err(|reason| ExecutionError::InvalidOutput {
            label: label.clone(),
            output: declared.clone(),
            reason,
        })?;
    }

    tokio::fs::create_dir_all(workdir)
        .await
        .map_err(|e| ExecutionError::io(e, workdir, "create output directory"))?;

    for declared in outputs {
        let path = workdir.join(declared);
        let removed = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
        removed.map_err(|e| ExecutionError::io(e, &path, "remove stale output"))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExecutionError::io(e, parent, "create output directory"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn label() -> Label {
        Label::parse("//pkg:t").unwrap()
    }

    fn owned(outputs: &[&str]) -> Vec<String> {
        outputs.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn removes_stale_files_and_directories() {
        let dir = TempDir::new().unwrap();
        let workdir = dir.path().join("pkg");
        fs::create_dir_all(workdir.join("gen")).unwrap();
        fs::write(workdir.join("gen/old.txt"), "old").unwrap();
        fs::write(workdir.join("bin"), "old").unwrap();
        fs::write(workdir.join("keep.txt"), "undeclared").unwrap();

        clear_outputs(&label(), &workdir, &owned(&["gen", "bin", "nested/lib.a"]))
            .await
            .unwrap();

        assert!(!workdir.join("gen").exists());
        assert!(!workdir.join("bin").exists());
        assert!(workdir.join("nested").is_dir());
        assert!(workdir.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn refuses_paths_outside_workdir() {
        let dir = TempDir::new().unwrap();
        let workdir = dir.path().join("out/pkg");
        fs::create_dir_all(dir.path().join("victim")).unwrap();
        fs::write(dir.path().join("victim/precious.txt"), "keep").unwrap();

        for output in ["../../victim", "", "/tmp"] {
            let err = clear_outputs(&label(), &workdir, &owned(&["ok", output]))
                .await
                .unwrap_err();
            assert!(matches!(err, ExecutionError::InvalidOutput { .. }), "{output:?}");
        }
        assert!(dir.path().join("victim/precious.txt").exists());
        assert!(!workdir.exists());
    }
}
