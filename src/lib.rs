//! appvm - per-application virtual machine handles
//!
//! appvm keeps named, persistent VM identities for a single application and
//! mediates their lifecycle. It does not virtualize anything itself: a
//! privileged [`VirtualizationService`] boots and tears down the actual VMs,
//! and appvm owns everything on the application side of that boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  VmManager (create / load / list / delete)      │
//! ├─────────────────────────────────────────────────┤
//! │  VirtualMachine (status, run, stop, set_config) │
//! ├────────────────────────┬────────────────────────┤
//! │  storage + vm::config  │  service + callback    │
//! │  (durable VM dirs)     │  (runtime, events)     │
//! └────────────────────────┴────────────────────────┘
//! ```
//!
//! # Storage layout
//!
//! ```text
//! <storage-root>/vm/<name>/config.json
//! <storage-root>/vm/<name>/instance.img
//! <storage-root>/vm/<name>/idsig
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use appvm::{ManagerConfig, VmConfig, VmManager, VmStatus};
//! # fn service() -> Arc<dyn appvm::VirtualizationService> { unimplemented!() }
//!
//! let manager = VmManager::new(ManagerConfig::for_owner("com.example.app")?, service());
//! let config = VmConfig::builder("/data/app/payload.apk")
//!     .payload_config_path("assets/vm_config.json")
//!     .num_cpus(2)
//!     .build()?;
//!
//! let mut vm = manager.create("vm1", config)?;
//! vm.run()?;
//! assert_eq!(vm.status()?, VmStatus::Running);
//! vm.stop();
//! # Ok::<(), appvm::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod service;
pub mod storage;
pub mod vm;

// Re-export main types for convenience
pub use callback::{VmCallback, VmEvent};
pub use config::ManagerConfig;
pub use error::{Error, ErrorKind, Result};
pub use manager::VmManager;
pub use service::{RuntimeHandle, ServiceError, StartRequest, VirtualizationService};
pub use storage::{VmDirectory, VmIdentity};
pub use vm::{DebugLevel, VirtualMachine, VmConfig, VmStatus};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
