//! Bridge to the privileged virtualization service.
//!
//! appvm never boots a VM itself. Everything that needs privileges goes
//! through a [`VirtualizationService`], which is injected into the manager at
//! construction so tests (and alternative transports) can substitute their
//! own implementation.

#[cfg(test)]
pub(crate) mod fake;

use crate::callback::VmEvent;
use crate::vm::VmConfig;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Failure reported by the virtualization service.
///
/// The two variants have different retry semantics, so implementations must
/// pick the right one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The service could not be reached or the call transport failed.
    #[error("communication failure: {0}")]
    Communication(String),

    /// The service was reached but refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Result type for service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Receives events emitted by a running VM.
pub type EventSink = Arc<dyn Fn(VmEvent) + Send + Sync>;

/// Invoked once if the service process dies.
pub type DeathNotifier = Box<dyn FnOnce() + Send>;

/// Everything the service needs to boot a VM.
#[derive(Debug)]
pub struct StartRequest<'a> {
    /// Configuration to boot.
    pub config: &'a VmConfig,
    /// Instance image, opened read-write.
    pub instance_image: File,
    /// Payload signature cache, opened read-only.
    pub idsig: File,
    /// Write end of the console pipe.
    pub console: File,
}

/// Live reference to a running VM.
///
/// Dropping the handle releases the VM; there is no separate stop call.
pub trait RuntimeHandle: Send + Sync {
    /// Whether the VM process is still alive.
    fn is_running(&self) -> ServiceResult<bool>;

    /// Context identifier of the VM.
    fn cid(&self) -> ServiceResult<u32>;

    /// Register a listener for payload and death events.
    fn register_listener(&self, sink: EventSink) -> ServiceResult<()>;
}

/// Operations of the privileged virtualization service.
pub trait VirtualizationService: Send + Sync {
    /// Format `image` as a writable partition of `size` bytes.
    fn initialize_writable_partition(&self, image: &File, size: u64) -> ServiceResult<()>;

    /// Hash and sign `payload`, writing the result to `output`.
    fn create_or_update_idsig(&self, payload: &Path, output: &File) -> ServiceResult<()>;

    /// Boot a VM.
    fn start_vm(&self, request: StartRequest<'_>) -> ServiceResult<Box<dyn RuntimeHandle>>;

    /// Subscribe to the death of the service process.
    fn link_to_death(&self, notifier: DeathNotifier) -> ServiceResult<()>;
}
