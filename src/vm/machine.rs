//! The VM handle.
//!
//! A [`VirtualMachine`] is the in-memory side of one VM identity. It owns the
//! runtime handle while the VM runs, the console pipe, and the callback slot.
//!
//! # Lifecycle
//!
//! ```text
//! create ──► Stopped ──run──► Running
//!              ▲  │             │
//!              └──┼────stop─────┘
//!                 └──delete──► Deleted (terminal)
//! ```
//!
//! Status is derived on every query, never cached: a live runtime handle
//! means `Running`, otherwise a missing config file means `Deleted`,
//! otherwise `Stopped`.

use crate::callback::{CallbackSlot, VmCallback, VmEvent};
use crate::error::{Error, Result};
use crate::service::{EventSink, RuntimeHandle, StartRequest, VirtualizationService};
use crate::storage::{self, VmDirectory, VmIdentity, INSTANCE_IMAGE_SIZE};
use crate::vm::console::ConsolePipe;
use crate::vm::{VmConfig, VmStatus};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Handle to a VM owned by the application.
///
/// Calls on one handle must be serialized by the caller; the handle does not
/// lock around `run`, `stop`, `delete` or `set_config`. Callbacks may be
/// replaced from any thread.
pub struct VirtualMachine {
    dir: VmDirectory,
    config: VmConfig,
    service: Arc<dyn VirtualizationService>,
    runtime: Option<Box<dyn RuntimeHandle>>,
    console: Option<ConsolePipe>,
    callbacks: CallbackSlot,
    death_linked: bool,
    deleted: bool,
}

impl VirtualMachine {
    fn new(dir: VmDirectory, config: VmConfig, service: Arc<dyn VirtualizationService>) -> Self {
        Self {
            dir,
            config,
            service,
            runtime: None,
            console: None,
            callbacks: CallbackSlot::new(),
            death_linked: false,
            deleted: false,
        }
    }

    /// Create a new VM under `storage_root`.
    ///
    /// The VM directory, config and instance image are written in that order,
    /// and the service then initializes the instance image. A failure part
    /// way leaves the files written so far in place; a later `create` with the
    /// same name fails with [`Error::AlreadyExists`] until the VM is deleted.
    pub fn create(
        storage_root: &Path,
        identity: VmIdentity,
        config: VmConfig,
        service: Arc<dyn VirtualizationService>,
    ) -> Result<Self> {
        config.validate()?;

        let dir = storage::allocate(storage_root, &identity)?;
        config.persist(&dir.config_path())?;

        let image = dir.create_instance_image(INSTANCE_IMAGE_SIZE)?;
        service
            .initialize_writable_partition(&image, INSTANCE_IMAGE_SIZE)
            .map_err(|e| Error::service("initializeWritablePartition", e))?;

        tracing::info!(vm = %identity, path = %dir.path().display(), "created vm");
        Ok(Self::new(dir, config, service))
    }

    /// Load a VM created earlier.
    ///
    /// Returns `Ok(None)` if the VM does not exist. A VM whose config exists
    /// without its instance image is corrupted and fails with
    /// [`Error::Corrupted`]; only deleting it helps.
    pub fn load(
        storage_root: &Path,
        identity: VmIdentity,
        service: Arc<dyn VirtualizationService>,
    ) -> Result<Option<Self>> {
        let Some(dir) = storage::resolve(storage_root, &identity)? else {
            return Ok(None);
        };
        let Some(config) = VmConfig::load(&dir.config_path())? else {
            return Ok(None);
        };

        if !dir.has_instance_image() {
            return Err(Error::corrupted(identity.name(), "instance image missing"));
        }

        tracing::debug!(vm = %identity, "loaded vm");
        Ok(Some(Self::new(dir, config, service)))
    }

    /// VM name. Unique within the owner and never changes.
    pub fn name(&self) -> &str {
        self.dir.identity().name()
    }

    /// VM identity.
    pub fn identity(&self) -> &VmIdentity {
        self.dir.identity()
    }

    /// Current config.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// VM directory.
    pub fn directory(&self) -> &VmDirectory {
        &self.dir
    }

    /// Current status, derived fresh on every call.
    ///
    /// A live runtime handle wins over the filesystem: a VM whose config was
    /// removed out-of-band still reports `Running` while it runs.
    pub fn status(&self) -> Result<VmStatus> {
        if let Some(runtime) = &self.runtime {
            let running = runtime
                .is_running()
                .map_err(|e| Error::service("isRunning", e))?;
            if running {
                return Ok(VmStatus::Running);
            }
        }
        if self.deleted || !self.dir.has_config() {
            return Ok(VmStatus::Deleted);
        }
        Ok(VmStatus::Stopped)
    }

    /// Register the callback for VM events, replacing any previous one.
    pub fn set_callback(&self, callback: Option<Arc<dyn VmCallback>>) {
        self.callbacks.set(callback);
    }

    /// Currently registered callback.
    pub fn callback(&self) -> Option<Arc<dyn VmCallback>> {
        self.callbacks.get()
    }

    /// Run the VM.
    ///
    /// Returning does not mean the payload has booted; that is reported
    /// through [`VmEvent::PayloadStarted`]. The VM must be stopped. If any
    /// step fails the VM stays stopped.
    pub fn run(&mut self) -> Result<()> {
        self.expect_stopped()?;
        // A handle whose VM already exited is stale.
        self.runtime = None;

        self.dir.ensure_idsig()?;

        let console = match self.console.as_ref() {
            Some(pipe) => pipe.writer()?,
            None => {
                let pipe = ConsolePipe::new()?;
                let writer = pipe.writer()?;
                self.console = Some(pipe);
                writer
            }
        };

        // The payload may have changed since the last run.
        {
            let idsig = self.dir.open_idsig_for_update()?;
            self.service
                .create_or_update_idsig(&self.config.payload_path, &idsig)
                .map_err(|e| Error::service("createOrUpdateIdsigFile", e))?;
        }
        let idsig = self.dir.open_idsig()?;
        let instance_image = self.dir.open_instance_image()?;

        let runtime = self
            .service
            .start_vm(StartRequest {
                config: &self.config,
                instance_image,
                idsig,
                console,
            })
            .map_err(|e| Error::service("startVm", e))?;

        let identity = self.dir.identity().clone();
        let slot = self.callbacks.clone();
        let sink: EventSink = Arc::new(move |event: VmEvent| slot.dispatch(&identity, event));
        runtime
            .register_listener(sink)
            .map_err(|e| Error::service("registerCallback", e))?;

        // One subscription per handle; it dispatches through the shared slot.
        if !self.death_linked {
            let identity = self.dir.identity().clone();
            let slot = self.callbacks.clone();
            self.service
                .link_to_death(Box::new(move || {
                    tracing::warn!(vm = %identity, "virtualization service died");
                    slot.dispatch(&identity, VmEvent::Died);
                }))
                .map_err(|e| Error::service("linkToDeath", e))?;
            self.death_linked = true;
        }

        self.runtime = Some(runtime);
        tracing::info!(vm = %self.identity(), "started vm");
        Ok(())
    }

    /// Stop the VM.
    ///
    /// Like pulling the plug: the runtime handle is dropped, nothing is
    /// awaited, and software in the VM is not notified. Stopping a stopped VM
    /// does nothing.
    pub fn stop(&mut self) {
        if self.runtime.take().is_some() {
            tracing::info!(vm = %self.identity(), "stopped vm");
        } else {
            tracing::debug!(vm = %self.identity(), "vm already stopped");
        }
    }

    /// Delete the VM and all of its durable state, including its secrets.
    ///
    /// Irreversible. The VM must be stopped. After a successful delete this
    /// handle is spent: every later call other than [`stop`](Self::stop)
    /// fails with [`Error::InvalidState`]. A VM created later under the same
    /// name is a different VM.
    pub fn delete(&mut self) -> Result<()> {
        self.expect_stopped()?;
        self.runtime = None;

        storage::remove(&self.dir)?;
        self.deleted = true;

        tracing::info!(vm = %self.identity(), "deleted vm");
        Ok(())
    }

    /// Read end of the console output.
    ///
    /// Fails with [`Error::ConsoleUnavailable`] until the VM has been run
    /// once.
    pub fn console_output_stream(&self) -> Result<File> {
        match &self.console {
            Some(pipe) => pipe.reader(),
            None => Err(Error::ConsoleUnavailable),
        }
    }

    /// Context identifier of the VM, if it is running.
    pub fn cid(&self) -> Result<Option<u32>> {
        if self.status()? != VmStatus::Running {
            return Ok(None);
        }
        match &self.runtime {
            Some(runtime) => runtime
                .cid()
                .map(Some)
                .map_err(|e| Error::service("getCid", e)),
            None => Ok(None),
        }
    }

    /// Replace the config.
    ///
    /// The VM must be stopped and `new` must be compatible with the current
    /// config. The new config is persisted before it is swapped in. Returns
    /// the previous config.
    pub fn set_config(&mut self, new: VmConfig) -> Result<VmConfig> {
        self.expect_stopped()?;
        new.validate()?;

        if let Some(reason) = self.config.incompatibility(&new) {
            return Err(Error::IncompatibleConfig(reason));
        }

        new.persist(&self.dir.config_path())?;
        tracing::info!(vm = %self.identity(), "updated vm config");
        Ok(std::mem::replace(&mut self.config, new))
    }

    fn expect_stopped(&self) -> Result<()> {
        let status = self.status()?;
        if status != VmStatus::Stopped {
            return Err(Error::invalid_state(VmStatus::Stopped.to_string(), status));
        }
        Ok(())
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        if self.runtime.take().is_some() {
            tracing::debug!(vm = %self.identity(), "releasing runtime handle on drop");
        }
    }
}

impl fmt::Display for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VirtualMachine(name: {}, config: {}, owner: {})",
            self.name(),
            self.config.payload_config_path,
            self.identity().owner()
        )
    }
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("identity", self.identity())
            .field("path", &self.dir.path())
            .field("config", &self.config)
            .field("has_runtime", &self.runtime.is_some())
            .field("deleted", &self.deleted)
            .finish()
    }
}
