//! Application-facing entry point.
//!
//! A [`VmManager`] binds the VMs of one application to its storage root and to
//! the virtualization service, and hands out [`VirtualMachine`] handles.

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::service::VirtualizationService;
use crate::storage::{self, VmIdentity};
use crate::vm::{VirtualMachine, VmConfig};
use std::path::Path;
use std::sync::Arc;

/// Creates, loads and deletes the VMs of one application.
pub struct VmManager {
    config: ManagerConfig,
    service: Arc<dyn VirtualizationService>,
}

impl VmManager {
    /// Create a manager.
    pub fn new(config: ManagerConfig, service: Arc<dyn VirtualizationService>) -> Self {
        Self { config, service }
    }

    /// Manager settings.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Application storage root.
    pub fn storage_root(&self) -> &Path {
        &self.config.storage_root
    }

    fn identity(&self, name: &str) -> VmIdentity {
        VmIdentity::new(&self.config.owner, name)
    }

    /// Create a new VM. Fails with [`Error::AlreadyExists`] if the name is
    /// taken.
    pub fn create(&self, name: &str, config: VmConfig) -> Result<VirtualMachine> {
        VirtualMachine::create(
            self.storage_root(),
            self.identity(name),
            config,
            self.service.clone(),
        )
    }

    /// Load an existing VM. Returns `Ok(None)` if it doesn't exist.
    pub fn load(&self, name: &str) -> Result<Option<VirtualMachine>> {
        VirtualMachine::load(self.storage_root(), self.identity(name), self.service.clone())
    }

    /// Load the VM if it exists, otherwise create it with `config`.
    ///
    /// An existing VM keeps its stored config; `config` is only used for
    /// creation.
    pub fn get_or_create(&self, name: &str, config: VmConfig) -> Result<VirtualMachine> {
        if let Some(vm) = self.load(name)? {
            return Ok(vm);
        }
        match self.create(name, config) {
            // Lost a race with another creator.
            Err(Error::AlreadyExists(_)) => self
                .load(name)?
                .ok_or_else(|| Error::corrupted(name, "vm directory exists without a config")),
            result => result,
        }
    }

    /// Names of all VMs in the storage root.
    pub fn list(&self) -> Result<Vec<String>> {
        storage::list_names(self.storage_root())
    }

    /// Delete a VM by name without loading it.
    ///
    /// This is the way to get rid of a corrupted VM, which cannot be loaded.
    /// It must not be running through any handle; that is not checked here.
    /// Returns whether there was anything to delete.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let identity = self.identity(name);
        match storage::resolve(self.storage_root(), &identity)? {
            Some(dir) => {
                storage::remove(&dir)?;
                tracing::info!(vm = %identity, "deleted vm");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for VmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
