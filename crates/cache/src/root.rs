//! Default location of the local cache directory.

use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::path::PathBuf;

/// Environment variable overriding the cache location.
pub const CACHE_DIR_ENV: &str = "KILN_CACHE_DIR";

/// Inputs for determining cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    kiln_cache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) KILN_CACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/kiln
    // 3) OS cache dir/kiln
    // 4) ~/.kiln/cache
    // 5) TMPDIR/kiln/cache
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.kiln_cache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("kiln"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("kiln"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".kiln/cache"));
    }
    candidates.push(inputs.temp_dir.join("kiln/cache"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // An existing directory may still be read-only (some CI images)
        if path.exists() {
            let probe = path.join(".write_probe");
            if std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
                .is_ok()
            {
                let _ = std::fs::remove_file(&probe);
                return Ok(path);
            }
            continue;
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve the default local cache directory, creating it if needed.
///
/// # Errors
///
/// Returns a configuration error if no candidate directory is writable.
pub fn default_cache_root() -> Result<PathBuf> {
    let env_path = |name: &str| {
        std::env::var(name)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    };
    cache_root_from_inputs(CacheInputs {
        kiln_cache_dir: env_path(CACHE_DIR_ENV),
        xdg_cache_home: env_path("XDG_CACHE_HOME"),
        os_cache_dir: cache_dir(),
        home_dir: home_dir(),
        temp_dir: std::env::temp_dir(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cache_root_skips_homeless_shelter() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheInputs {
            kiln_cache_dir: None,
            xdg_cache_home: Some(PathBuf::from("/homeless-shelter/.cache")),
            os_cache_dir: None,
            home_dir: Some(PathBuf::from("/homeless-shelter")),
            temp_dir: tmp.path().to_path_buf(),
        };
        let dir = cache_root_from_inputs(inputs).unwrap();
        assert!(!dir.starts_with("/homeless-shelter"));
        assert!(dir.starts_with(tmp.path()));
    }

    #[test]
    fn cache_root_respects_override() {
        let tmp = TempDir::new().unwrap();
        let wanted = tmp.path().join("override");
        let inputs = CacheInputs {
            kiln_cache_dir: Some(wanted.clone()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(cache_root_from_inputs(inputs).unwrap(), wanted);
        assert!(wanted.is_dir());
    }

    #[test]
    fn empty_override_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheInputs {
            kiln_cache_dir: Some(PathBuf::new()),
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: None,
            temp_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(
            cache_root_from_inputs(inputs).unwrap(),
            tmp.path().join("xdg/kiln")
        );
    }
}
