//! VM handles and their configuration.
//!
//! - [`VmConfig`]: what a VM boots and with which resources
//! - [`VirtualMachine`]: handle controlling one VM's lifecycle
//! - [`VmStatus`]: derived lifecycle status

pub mod config;
pub mod console;
pub mod machine;
pub mod state;

pub use config::{DebugLevel, VmConfig, VmConfigBuilder};
pub use console::ConsolePipe;
pub use machine::VirtualMachine;
pub use state::VmStatus;
