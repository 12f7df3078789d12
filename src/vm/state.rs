//! VM lifecycle status.

use serde::{Deserialize, Serialize};

/// Observed status of a VM.
///
/// Status is never stored. It is derived on every query from the runtime
/// handle and the VM's directory (see [`VirtualMachine::status`]).
///
/// [`VirtualMachine::status`]: crate::VirtualMachine::status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    /// Just created, or stopped after running.
    Stopped,
    /// The VM is running.
    Running,
    /// The VM's durable state is gone. Irreversible.
    Deleted,
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmStatus::Stopped => write!(f, "stopped"),
            VmStatus::Running => write!(f, "running"),
            VmStatus::Deleted => write!(f, "deleted"),
        }
    }
}
