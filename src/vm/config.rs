//! VM configuration and its durable store.
//!
//! A [`VmConfig`] describes which payload a VM boots and with what resources.
//! It is persisted as the VM's `config.json`. Writes go through a temporary
//! file in the same directory and are renamed into place, so a reader never
//! observes a half-written config.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Debug level of the VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DebugLevel {
    /// Not debuggable.
    #[default]
    None,
    /// Only the app payload is debuggable.
    AppOnly,
    /// The whole VM is debuggable.
    Full,
}

impl std::fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DebugLevel::None => write!(f, "none"),
            DebugLevel::AppOnly => write!(f, "app_only"),
            DebugLevel::Full => write!(f, "full"),
        }
    }
}

/// Configuration of a VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmConfig {
    /// Path to the app payload (the package whose code runs in the VM).
    pub payload_path: PathBuf,

    /// Path of the payload config, relative to the payload.
    pub payload_config_path: String,

    /// Debug level.
    #[serde(default)]
    pub debug_level: DebugLevel,

    /// Whether the VM runs in protected mode.
    #[serde(default)]
    pub protected_vm: bool,

    /// Memory in MiB. `None` lets the service pick.
    #[serde(default)]
    pub memory_mib: Option<u32>,

    /// Number of vCPUs.
    #[serde(default = "default_cpus")]
    pub num_cpus: u32,

    /// Signer identity of the payload, if known.
    #[serde(default)]
    pub payload_signer: Option<String>,
}

fn default_cpus() -> u32 {
    1
}

impl VmConfig {
    /// Start building a config for the payload at `payload_path`.
    pub fn builder(payload_path: impl Into<PathBuf>) -> VmConfigBuilder {
        VmConfigBuilder {
            config: VmConfig {
                payload_path: payload_path.into(),
                payload_config_path: String::new(),
                debug_level: DebugLevel::None,
                protected_vm: false,
                memory_mib: None,
                num_cpus: default_cpus(),
                payload_signer: None,
            },
        }
    }

    /// Check the config for values no VM could boot with.
    pub fn validate(&self) -> Result<()> {
        if self.payload_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("payload path cannot be empty".into()));
        }
        if self.payload_config_path.is_empty() {
            return Err(Error::InvalidConfig(
                "payload config path cannot be empty".into(),
            ));
        }
        if self.num_cpus == 0 {
            return Err(Error::InvalidConfig("number of vCPUs cannot be 0".into()));
        }
        if self.memory_mib == Some(0) {
            return Err(Error::InvalidConfig("memory cannot be 0 MiB".into()));
        }
        Ok(())
    }

    /// Whether a VM created with `self` can switch to `new` and still boot.
    ///
    /// The check is one-way (`self` is the current config) and conservative:
    /// anything that may change the identity the VM presents to its secrets
    /// makes the configs incompatible. Resources can change freely.
    pub fn is_compatible_with(&self, new: &VmConfig) -> bool {
        self.incompatibility(new).is_none()
    }

    /// Describe why `new` cannot replace `self`, or `None` if it can.
    pub fn incompatibility(&self, new: &VmConfig) -> Option<String> {
        if self.protected_vm != new.protected_vm {
            return Some(format!(
                "protected mode changes from {} to {}",
                self.protected_vm, new.protected_vm
            ));
        }
        if self.debug_level != new.debug_level {
            return Some(format!(
                "debug level changes from {} to {}",
                self.debug_level, new.debug_level
            ));
        }
        match (&self.payload_signer, &new.payload_signer) {
            (Some(old), Some(new_signer)) if old == new_signer => None,
            (Some(_), Some(_)) => Some("payload signer changes".to_string()),
            (Some(_), None) => Some("new config does not record the payload signer".to_string()),
            (None, Some(_)) => {
                Some("current config does not record the payload signer".to_string())
            }
            (None, None) if self.payload_path != new.payload_path => Some(
                "payload changes and neither config records its signer".to_string(),
            ),
            (None, None) => None,
        }
    }

    /// Write the config to `path`, replacing any existing file atomically.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("failed to serialize config: {}", e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::storage("create temp config", dir, e))?;
        tmp.write_all(&json)
            .map_err(|e| Error::storage("write config", tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::storage("sync config", tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| Error::storage("persist config", path, e.error))?;

        tracing::debug!(path = %path.display(), "persisted config");
        Ok(())
    }

    /// Read the config at `path`.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage("read config", path, e)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Builder for [`VmConfig`].
#[derive(Debug, Clone)]
pub struct VmConfigBuilder {
    config: VmConfig,
}

impl VmConfigBuilder {
    /// Set the payload config path.
    pub fn payload_config_path(mut self, path: impl Into<String>) -> Self {
        self.config.payload_config_path = path.into();
        self
    }

    /// Set the debug level.
    pub fn debug_level(mut self, level: DebugLevel) -> Self {
        self.config.debug_level = level;
        self
    }

    /// Set protected mode.
    pub fn protected_vm(mut self, protected: bool) -> Self {
        self.config.protected_vm = protected;
        self
    }

    /// Set memory in MiB.
    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.config.memory_mib = Some(mib);
        self
    }

    /// Set the number of vCPUs.
    pub fn num_cpus(mut self, cpus: u32) -> Self {
        self.config.num_cpus = cpus;
        self
    }

    /// Record the payload signer identity.
    pub fn payload_signer(mut self, signer: impl Into<String>) -> Self {
        self.config.payload_signer = Some(signer.into());
        self
    }

    /// Validate and build the config.
    pub fn build(self) -> Result<VmConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
