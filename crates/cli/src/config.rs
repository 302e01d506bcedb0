//! `kiln.toml` configuration
//!
//! ```toml
//! [build]
//! jobs = 8
//! keepGoing = false
//! defaultTimeout = 600
//!
//! [cache]
//! dir = "/var/cache/kiln"
//! mode = "read-write"
//!
//! [[cache.remote]]
//! url = "grpc://cache.internal:9092"
//! mode = "read-only"
//!
//! [cleaner]
//! highWaterMarkBytes = 10737418240
//! lowWaterMarkBytes = 8589934592
//! minAge = 600
//! scanInterval = 300
//! ```
//!
//! Every section and key is optional. Command line flags override the file.

use crate::errors::{CliError, Result};
use kiln_cache::{CacheMode, CleanerConfig, LocalStore};
use kiln_engine::BuildConfig;
use kiln_remote::RemoteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";

/// Cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSection {
    /// Local cache directory; resolved from the environment when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// How the local cache takes part in builds
    pub mode: CacheMode,
    /// Remote tiers, consulted in order after the local cache
    pub remote: Vec<RemoteConfig>,
}

impl CacheSection {
    /// Open the local store, creating its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no cache directory can be created.
    pub fn open_store(&self, dir_override: Option<&Path>) -> Result<LocalStore> {
        let dir = match dir_override.or(self.dir.as_deref()) {
            Some(dir) => dir.to_path_buf(),
            None => kiln_cache::default_cache_root()?,
        };
        Ok(LocalStore::open(dir)?)
    }
}

/// Contents of `kiln.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KilnConfig {
    /// Build settings
    pub build: BuildConfig,
    /// Cache settings
    pub cache: CacheSection,
    /// Cache cleaner settings
    pub cleaner: CleanerConfig,
}

impl KilnConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns a parse error naming `path` if the document is invalid.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CliError::parse("config", path, e.to_string()))?;
        config
            .cleaner
            .validate()
            .map_err(|e| CliError::parse("config", path, e.to_string()))?;
        Ok(config)
    }

    /// Load the configuration.
    ///
    /// An explicit path must exist. Without one, `kiln.toml` in the working
    /// directory is used if present, and defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    tracing::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|e| CliError::file(&path, e))?;
        let config = Self::parse(&text, &path)?;
        tracing::debug!(path = %path.display(), remotes = config.cache.remote.len(), "Loaded configuration");
        Ok(config)
    }
}
