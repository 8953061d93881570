//! Classification of raw method results.
//!
//! Hyper-V management methods return:
//! - 0: Completed successfully (synchronous)
//! - 4096: Job started (check Job output parameter)
//! - 32775: Host busy with a conflicting operation
//! - Other: Error code

use crate::transport::{JobHandle, MethodOutput};

/// Method completed synchronously.
pub const RETURN_COMPLETED: u32 = 0;

/// Method started an asynchronous job.
pub const RETURN_JOB_STARTED: u32 = 4096;

/// Return codes meaning "another operation is in progress, try again".
pub const TRANSIENT_RETURN_CODES: &[u32] = &[32775];

/// What a method result means for the caller.
#[derive(Debug)]
pub enum OperationOutcome {
    /// Finished synchronously.
    Succeeded(MethodOutput),
    /// Finished asynchronously; the job must be waited on.
    Pending { job: JobHandle, output: MethodOutput },
    /// Host was busy; the same call may be re-issued.
    TransientConflict(u32),
    /// Host rejected the call.
    Fatal { code: u32, message: String },
}

impl OperationOutcome {
    /// Interpret a raw method result. No side effects.
    pub fn classify(output: MethodOutput) -> Self {
        match output.return_value {
            RETURN_COMPLETED => OperationOutcome::Succeeded(output),
            RETURN_JOB_STARTED => match output.job() {
                Some(job) => OperationOutcome::Pending { job, output },
                None => OperationOutcome::Fatal {
                    code: RETURN_JOB_STARTED,
                    message: "Operation reported as pending without a job handle".to_string(),
                },
            },
            code if TRANSIENT_RETURN_CODES.contains(&code) => {
                OperationOutcome::TransientConflict(code)
            }
            code => OperationOutcome::Fatal {
                code,
                message: output
                    .get("ErrorDescription")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Operation failed with code {}", code)),
            },
        }
    }
}
