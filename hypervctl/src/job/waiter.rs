//! Waiting on host jobs with timeout support.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, JobState, Result};
use crate::transport::{JobHandle, Transport};

/// Default polling interval for job status.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Job progress information.
#[derive(Debug, Clone)]
pub struct JobProgress {
    /// Current job state.
    pub state: JobState,
    /// Percent complete (0-100).
    pub percent_complete: u32,
    /// Elapsed time since waiting started.
    pub elapsed: Duration,
    /// Error code if job failed.
    pub error_code: Option<u32>,
}

impl JobProgress {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }
}

/// Configuration for job waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWaitConfig {
    /// Maximum time to wait for job completion; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Polling interval for job status.
    pub poll_interval: Duration,
}

impl Default for JobWaitConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl JobWaitConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Owns a job handle and releases it exactly once, on every exit path.
pub struct JobGuard<'a, T: Transport + ?Sized> {
    transport: &'a T,
    job: JobHandle,
}

impl<'a, T: Transport + ?Sized> JobGuard<'a, T> {
    pub fn new(transport: &'a T, job: JobHandle) -> Self {
        Self { transport, job }
    }

    pub fn job(&self) -> &JobHandle {
        &self.job
    }
}

impl<T: Transport + ?Sized> Drop for JobGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.close_job(&self.job) {
            warn!(job = %self.job, error = %e, "Failed to release job handle");
        }
    }
}

/// Job waiter for asynchronous host operations.
pub struct JobWaiter<'a, T: Transport + ?Sized> {
    transport: &'a T,
    config: JobWaitConfig,
}

impl<'a, T: Transport + ?Sized> JobWaiter<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            config: JobWaitConfig::default(),
        }
    }

    pub fn with_config(transport: &'a T, config: JobWaitConfig) -> Self {
        Self { transport, config }
    }

    /// Wait for a job to finish, consuming its handle.
    pub fn wait_for_job(&self, job: JobHandle, operation: &str) -> Result<JobProgress> {
        self.wait_for_job_with_callback(job, operation, |_| {})
    }

    /// Wait for a job to finish with a progress callback.
    ///
    /// The handle is released once whether the job completes, fails, times out,
    /// or polling itself errors.
    pub fn wait_for_job_with_callback<F>(
        &self,
        job: JobHandle,
        operation: &str,
        mut callback: F,
    ) -> Result<JobProgress>
    where
        F: FnMut(&JobProgress),
    {
        let guard = JobGuard::new(self.transport, job);
        let start = Instant::now();

        loop {
            let status = self.transport.poll_job(guard.job())?;
            let progress = JobProgress {
                state: status.state,
                percent_complete: status.percent_complete,
                elapsed: start.elapsed(),
                error_code: status.error_code,
            };
            callback(&progress);

            if progress.is_completed() {
                debug!(job = %guard.job(), operation, elapsed = ?progress.elapsed, "Job completed");
                return Ok(progress);
            }

            if progress.is_failed() {
                let description = match self.transport.job_diagnostics(guard.job()) {
                    Ok(text) => single_line(&text),
                    Err(e) => {
                        debug!(job = %guard.job(), error = %e, "No job diagnostics");
                        "Unknown error".to_string()
                    }
                };
                return Err(Error::job_failed(
                    operation,
                    progress.error_code.unwrap_or(0),
                    description,
                    progress.state,
                ));
            }

            if let Some(timeout) = self.config.timeout {
                if start.elapsed() >= timeout {
                    return Err(Error::JobTimeout {
                        operation: operation.to_string(),
                        job: guard.job().to_string(),
                        timeout,
                        last_state: progress.state,
                    });
                }
            }

            std::thread::sleep(self.config.poll_interval);
        }
    }
}

/// Collapse embedded line breaks into spaces.
pub(crate) fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}
