//! Delivery of VM lifecycle events to the application.
//!
//! Each [`VirtualMachine`](crate::VirtualMachine) owns one [`CallbackSlot`].
//! The slot holds at most one callback; registering a new one silently
//! replaces the old. Events arrive on whatever thread the service delivers
//! them on, so the slot is read atomically and the lock is released before the
//! callback runs. An event racing a replacement may still reach the previous
//! callback.

use crate::storage::VmIdentity;
use parking_lot::RwLock;
use std::fmt;
use std::fs::File;
use std::sync::Arc;

/// Event relayed from a running VM.
#[derive(Debug)]
pub enum VmEvent {
    /// The payload inside the VM started.
    PayloadStarted {
        /// Output stream of the payload, if the service provided one.
        stream: Option<File>,
    },
    /// The VM died, or the service hosting it did.
    ///
    /// May be delivered more than once for the same VM.
    Died,
}

impl VmEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            VmEvent::PayloadStarted { .. } => "payload_started",
            VmEvent::Died => "died",
        }
    }
}

/// Application callback for VM events.
pub trait VmCallback: Send + Sync {
    /// Called for every event of the VM `vm`.
    fn on_event(&self, vm: &VmIdentity, event: VmEvent);
}

impl<F> VmCallback for F
where
    F: Fn(&VmIdentity, VmEvent) + Send + Sync,
{
    fn on_event(&self, vm: &VmIdentity, event: VmEvent) {
        self(vm, event)
    }
}

/// Single-slot, last-write-wins callback registry.
#[derive(Clone, Default)]
pub struct CallbackSlot {
    inner: Arc<RwLock<Option<Arc<dyn VmCallback>>>>,
}

impl CallbackSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered callback. `None` clears it.
    pub fn set(&self, callback: Option<Arc<dyn VmCallback>>) {
        *self.inner.write() = callback;
    }

    /// Get the registered callback.
    pub fn get(&self) -> Option<Arc<dyn VmCallback>> {
        self.inner.read().clone()
    }

    /// Deliver an event to the current callback, if any.
    pub fn dispatch(&self, vm: &VmIdentity, event: VmEvent) {
        // Clone out so a callback may re-register without deadlocking.
        let callback = self.get();
        match callback {
            Some(cb) => {
                tracing::debug!(vm = %vm, event = event.name(), "dispatching event");
                cb.on_event(vm, event);
            }
            None => {
                tracing::trace!(
                    vm = %vm,
                    event = event.name(),
                    "no callback registered, dropping event"
                );
            }
        }
    }
}

impl fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("registered", &self.inner.read().is_some())
            .finish()
    }
}
