//! Re-issuing calls the host rejected as busy.

use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::job::{JobWaitConfig, JobWaiter, OperationOutcome};
use crate::transport::{MethodOutput, Transport};

/// Default pause between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Retry policy for transient host conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before re-issuing a call.
    pub interval: Duration,
    /// Total attempt ceiling; `None` retries until the host stops reporting busy.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run `call` until the host stops reporting a transient conflict.
    ///
    /// Jobs are waited on to completion. Anything else propagates: transport
    /// errors, job failures, and fatal return codes.
    pub fn execute<T, F>(
        &self,
        transport: &T,
        wait: &JobWaitConfig,
        operation: &str,
        mut call: F,
    ) -> Result<MethodOutput>
    where
        T: Transport + ?Sized,
        F: FnMut() -> Result<MethodOutput>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match OperationOutcome::classify(call()?) {
                OperationOutcome::Succeeded(output) => return Ok(output),
                OperationOutcome::Pending { job, output } => {
                    debug!(operation, job = %job, "Waiting for job");
                    JobWaiter::with_config(transport, wait.clone()).wait_for_job(job, operation)?;
                    return Ok(output);
                }
                OperationOutcome::TransientConflict(code) => {
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(Error::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts,
                        });
                    }
                    debug!(operation, code, attempts, "Host busy, retrying");
                    std::thread::sleep(self.interval);
                }
                OperationOutcome::Fatal { code, message } => {
                    return Err(Error::operation_failed(operation, code, message));
                }
            }
        }
    }
}
