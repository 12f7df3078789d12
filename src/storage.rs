//! Persistent VM storage.
//!
//! This module maps a [`VmIdentity`] to the directory that holds the VM's
//! durable state. The directory is the VM: as long as it exists (with a config
//! and an instance image), the VM exists.
//!
//! # Storage Locations
//!
//! ```text
//! <storage-root>/vm/<name>/
//! ├── config.json    # Serialized VmConfig
//! ├── instance.img   # Fixed-size per-instance secret image
//! └── idsig          # Payload signature cache, rebuilt on every run
//! ```
//!
//! Directory creation is the uniqueness primitive: [`allocate`] relies on an
//! atomic `mkdir`, so two concurrent allocations of the same identity cannot
//! both succeed.

use crate::error::{Error, Result};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory under the storage root that holds all VMs.
pub const VM_DIR: &str = "vm";

/// Config filename.
pub const CONFIG_FILENAME: &str = "config.json";

/// Instance image filename.
pub const INSTANCE_IMAGE_FILENAME: &str = "instance.img";

/// Idsig filename.
pub const IDSIG_FILENAME: &str = "idsig";

/// Size of the instance image (10 MiB).
pub const INSTANCE_IMAGE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum VM name length.
pub const MAX_NAME_LEN: usize = 64;

/// Identity of a VM: the owning application and the VM's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmIdentity {
    owner: String,
    name: String,
}

impl VmIdentity {
    /// Create a new identity.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Owning application.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// VM name, unique within the owner.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Validate a VM name.
///
/// Names become directory names, so the rules are strict:
/// - Length: 1..=64 characters
/// - Allowed characters: alphanumeric, hyphen (-), underscore (_)
/// - Must start with a letter or digit
/// - No path separators (/, \)
pub fn validate_name(name: &str) -> Result<()> {
    let first_char = name
        .chars()
        .next()
        .ok_or_else(|| Error::invalid_name(name, "name cannot be empty"))?;

    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_name(
            name,
            format!("too long: {} characters (max {})", name.len(), MAX_NAME_LEN),
        ));
    }

    if !first_char.is_ascii_alphanumeric() {
        return Err(Error::invalid_name(name, "must start with a letter or digit"));
    }

    for c in name.chars() {
        if c == '/' || c == '\\' {
            return Err(Error::invalid_name(name, "cannot contain path separators"));
        }
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(Error::invalid_name(
                name,
                format!("contains invalid character: '{}'", c),
            ));
        }
    }

    Ok(())
}

/// Directory holding all VMs under `storage_root`.
pub fn vm_root(storage_root: &Path) -> PathBuf {
    storage_root.join(VM_DIR)
}

/// A VM's on-disk directory.
#[derive(Debug, Clone)]
pub struct VmDirectory {
    identity: VmIdentity,
    path: PathBuf,
}

impl VmDirectory {
    fn new(storage_root: &Path, identity: &VmIdentity) -> Self {
        Self {
            path: vm_root(storage_root).join(identity.name()),
            identity: identity.clone(),
        }
    }

    /// Identity this directory belongs to.
    pub fn identity(&self) -> &VmIdentity {
        &self.identity
    }

    /// Path to the directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILENAME)
    }

    /// Path to the instance image.
    pub fn instance_image_path(&self) -> PathBuf {
        self.path.join(INSTANCE_IMAGE_FILENAME)
    }

    /// Path to the idsig file.
    pub fn idsig_path(&self) -> PathBuf {
        self.path.join(IDSIG_FILENAME)
    }

    /// Whether the config file exists.
    pub fn has_config(&self) -> bool {
        self.config_path().exists()
    }

    /// Whether the instance image exists.
    pub fn has_instance_image(&self) -> bool {
        self.instance_image_path().exists()
    }

    /// Create the instance image as a sparse file of `size_bytes`.
    ///
    /// Fails if the image already exists; the image is never recreated.
    pub fn create_instance_image(&self, size_bytes: u64) -> Result<File> {
        if size_bytes == 0 {
            return Err(Error::InvalidConfig(
                "instance image size must be greater than 0".into(),
            ));
        }

        let path = self.instance_image_path();
        tracing::debug!(path = %path.display(), size_bytes, "creating instance image");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::storage("create instance image", &path, e))?;
        file.set_len(size_bytes)
            .map_err(|e| Error::storage("size instance image", &path, e))?;
        file.sync_all()
            .map_err(|e| Error::storage("sync instance image", &path, e))?;

        Ok(file)
    }

    /// Open the instance image read-write.
    pub fn open_instance_image(&self) -> Result<File> {
        let path = self.instance_image_path();
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::storage("open instance image", &path, e))
    }

    /// Create the idsig file if it does not exist yet.
    pub fn ensure_idsig(&self) -> Result<()> {
        let path = self.idsig_path();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                tracing::debug!(path = %path.display(), "created idsig file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::storage("create idsig file", &path, e)),
        }
    }

    /// Open the idsig file read-write for regeneration.
    pub fn open_idsig_for_update(&self) -> Result<File> {
        let path = self.idsig_path();
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::storage("open idsig file", &path, e))
    }

    /// Open the idsig file read-only.
    pub fn open_idsig(&self) -> Result<File> {
        let path = self.idsig_path();
        File::open(&path).map_err(|e| Error::storage("reopen idsig file", &path, e))
    }
}

/// Allocate a new VM directory.
///
/// Parents are created as needed; the VM directory itself is created with a
/// single `mkdir`, which fails with [`Error::AlreadyExists`] if it is already
/// there.
pub fn allocate(storage_root: &Path, identity: &VmIdentity) -> Result<VmDirectory> {
    validate_name(identity.name())?;
    let dir = VmDirectory::new(storage_root, identity);

    let root = vm_root(storage_root);
    std::fs::create_dir_all(&root).map_err(|e| Error::storage("create vm root", &root, e))?;

    match std::fs::create_dir(dir.path()) {
        Ok(()) => {
            tracing::debug!(vm = %identity, path = %dir.path().display(), "allocated vm directory");
            Ok(dir)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(Error::AlreadyExists(identity.name().to_string()))
        }
        Err(e) => Err(Error::storage("create vm directory", dir.path(), e)),
    }
}

/// Find an existing VM directory.
///
/// Returns `Ok(None)` if there is no directory for `identity`.
pub fn resolve(storage_root: &Path, identity: &VmIdentity) -> Result<Option<VmDirectory>> {
    validate_name(identity.name())?;
    let dir = VmDirectory::new(storage_root, identity);
    match std::fs::metadata(dir.path()) {
        Ok(meta) if meta.is_dir() => Ok(Some(dir)),
        Ok(_) => Err(Error::corrupted(
            identity.name(),
            "vm path exists but is not a directory",
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::storage("stat vm directory", dir.path(), e)),
    }
}

/// Remove a VM directory and its files.
///
/// Best effort: every removal is attempted, missing files are ignored, and the
/// first real failure is returned. Nothing is rolled back. Files the VM does
/// not own are removed along with the directory.
pub fn remove(dir: &VmDirectory) -> Result<()> {
    let mut first_error = None;

    let files = [dir.config_path(), dir.instance_image_path(), dir.idsig_path()];
    for path in files.iter() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove vm file");
                if first_error.is_none() {
                    first_error = Some(Error::storage("remove vm file", path, e));
                }
            }
        }
    }

    // Sweeps leftovers too, such as temp files from an interrupted config
    // write; otherwise the name could never be allocated again.
    if let Err(e) = std::fs::remove_dir_all(dir.path()) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(
                path = %dir.path().display(),
                error = %e,
                "failed to remove vm directory"
            );
            if first_error.is_none() {
                first_error = Some(Error::storage("remove vm directory", dir.path(), e));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            tracing::debug!(vm = %dir.identity(), "removed vm directory");
            Ok(())
        }
    }
}

/// List the names of all VM directories under `storage_root`, sorted.
pub fn list_names(storage_root: &Path) -> Result<Vec<String>> {
    let root = vm_root(storage_root);
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::storage("list vm root", &root, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::storage("list vm root", &root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if validate_name(name).is_ok() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
