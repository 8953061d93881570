//! Virtual machine state, lifecycle and sizing.

mod machine;
mod reconciler;
mod settings;
mod state;

pub use machine::{VirtualMachine, DEVICE_NOT_USABLE};
pub use reconciler::{ReconcileConfig, StateReconciler, Transition, DEFAULT_STATE_CHANGE_TIMEOUT};
pub use settings::{
    validate_memory_mb, validate_processor_count, VmSettings, MAX_MEMORY_MB, MAX_PROCESSOR_COUNT,
    MIN_MEMORY_MB,
};
pub use state::{Generation, RequestedState, VmState, VmStatus};
