//! # hypervctl
//!
//! Hyper-V job completion, state reconciliation and resource configuration.
//!
//! Management calls on Hyper-V either complete synchronously, start a job that
//! must be polled to completion, or report that the host is busy. This crate
//! turns that into plain blocking operations with typed outcomes:
//!
//! - **Jobs**: classify method results, wait on jobs, always release handles
//! - **Retry**: transient conflicts are retried at a fixed interval
//! - **Lifecycle**: start, stop, reboot, suspend, resume and pause, each
//!   waiting until the VM reaches the target state
//! - **Provisioning**: create VMs, resize their processors and memory
//! - **Resources**: add, modify and remove resource and feature settings,
//!   attach and detach virtual hard disks, manage network adapters
//! - **Host objects**: create, retype and delete virtual switches; create,
//!   resize and delete disk images
//!
//! All host access goes through the [`Transport`] trait. On Windows,
//! [`wmi::WmiTransport`] talks to `root\virtualization\v2`.
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! fn main() -> hypervctl::Result<()> {
//!     use hypervctl::{DiskRole, Generation, HyperV, VhdType, VmSettings};
//!
//!     let hyperv = HyperV::connect()?;
//!     hyperv.init_logging();
//!
//!     let mut vm = hyperv.create_vm(&VmSettings::new("web01", Generation::Gen2))?;
//!     hyperv.create_vhd(r"C:\vms\data.vhdx", 20 << 30, VhdType::Dynamic)?;
//!     hyperv.attach_vhd(&vm, r"C:\vms\data.vhdx", DiskRole::Data)?;
//!     hyperv.start(&mut vm)?;
//!     Ok(())
//! }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```

pub mod config;
pub mod error;
mod hyperv;
pub mod job;
pub mod network;
pub mod query;
pub mod resource;
pub mod retry;
pub mod storage;
pub mod transport;
pub mod vm;
#[cfg(windows)]
pub mod wmi;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::{Config, ConfigError};
pub use error::{Error, JobState, Result};
pub use hyperv::HyperV;
pub use job::{JobProgress, JobWaitConfig, JobWaiter, OperationOutcome};
pub use network::{BandwidthLimit, SwitchType, VirtualSwitch};
pub use resource::{ResourceSettings, ResourceSettingsOrchestrator, ResourceType};
pub use retry::RetryPolicy;
pub use storage::{DiskAttachment, DiskRole, VhdFormat, VhdType};
pub use transport::{
    Instance, JobHandle, JobStatus, MethodInputs, MethodOutput, ObjectPath, Transport, Value,
};
pub use vm::{
    Generation, ReconcileConfig, RequestedState, StateReconciler, Transition, VirtualMachine,
    VmSettings, VmState, VmStatus,
};

/// Initialize tracing/logging with the given filter level.
///
/// `RUST_LOG` wins over `filter` when set. Calling this twice is harmless.
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
