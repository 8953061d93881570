//! Asynchronous job handling.
//!
//! Hyper-V methods often return immediately with a job reference. This module
//! classifies raw method results and waits on the resulting jobs.

mod operation;
mod waiter;

pub use operation::{
    OperationOutcome, RETURN_COMPLETED, RETURN_JOB_STARTED, TRANSIENT_RETURN_CODES,
};
pub use waiter::{JobGuard, JobProgress, JobWaitConfig, JobWaiter, DEFAULT_POLL_INTERVAL};
