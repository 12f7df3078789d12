//! Manager settings.
//!
//! This module handles the settings a [`VmManager`](crate::VmManager) is
//! constructed from: which application owns the VMs and where their storage
//! lives. Settings can be kept in a TOML file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "appvm=warn";

/// Settings for a [`VmManager`](crate::VmManager).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Configuration format version.
    #[serde(default = "default_version")]
    pub version: u8,

    /// Application owning the VMs.
    pub owner: String,

    /// Application storage root. VMs live under `<storage_root>/vm/`.
    pub storage_root: PathBuf,

    /// Log filter used by [`logging::init`](crate::logging::init).
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_version() -> u8 {
    1
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl ManagerConfig {
    /// Settings for `owner` with an explicit storage root.
    pub fn new(owner: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            version: default_version(),
            owner: owner.into(),
            storage_root: storage_root.into(),
            log_filter: default_log_filter(),
        }
    }

    /// Settings for `owner` in the platform data directory.
    ///
    /// On macOS: `~/Library/Application Support/<owner>`
    /// On Linux: `~/.local/share/<owner>`
    pub fn for_owner(owner: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .ok_or_else(|| Error::ConfigLoad("could not determine data directory".into()))?;
        let storage_root = data_dir.join(&owner);
        Ok(Self::new(owner, storage_root))
    }

    /// Load settings from a TOML file.
    ///
    /// If the file doesn't exist, returns `for_owner(owner)`.
    pub fn load(path: &Path, owner: &str) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Self::for_owner(owner);
            }
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        };

        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        if config.owner.is_empty() {
            return Err(Error::ConfigLoad(format!(
                "{}: owner cannot be empty",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Save settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::ConfigSave(e.to_string()))?;
        }
        std::fs::write(path, contents).map_err(|e| Error::ConfigSave(e.to_string()))
    }
}
