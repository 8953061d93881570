//! Error types for Hyper-V operations.

use core::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::vm::VmState;

/// WMI Job state values for async operations (CIM_ConcreteJob.JobState).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum JobState {
    /// Job is queued.
    New = 2,
    /// Job is starting.
    Starting = 3,
    /// Job is running.
    Running = 4,
    /// Job is suspended.
    Suspended = 5,
    /// Job is shutting down.
    ShuttingDown = 6,
    /// Job completed successfully.
    Completed = 7,
    /// Job was terminated.
    Terminated = 8,
    /// Job was killed.
    Killed = 9,
    /// Job failed with exception.
    Exception = 10,
    /// Job is in service mode.
    Service = 11,
    /// Unknown state.
    Unknown = 0,
}

impl From<u16> for JobState {
    fn from(value: u16) -> Self {
        match value {
            2 => JobState::New,
            3 => JobState::Starting,
            4 => JobState::Running,
            5 => JobState::Suspended,
            6 => JobState::ShuttingDown,
            7 => JobState::Completed,
            8 => JobState::Terminated,
            9 => JobState::Killed,
            10 => JobState::Exception,
            11 => JobState::Service,
            _ => JobState::Unknown,
        }
    }
}

impl JobState {
    /// Check if job is still running.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobState::New
                | JobState::Starting
                | JobState::Running
                | JobState::Suspended
                | JobState::ShuttingDown
        )
    }

    /// Check if job completed successfully.
    pub fn is_completed(&self) -> bool {
        *self == JobState::Completed
    }

    /// Check if job reached a terminal state other than success.
    pub fn is_failed(&self) -> bool {
        !self.is_running() && !self.is_completed()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::New => "New",
            JobState::Starting => "Starting",
            JobState::Running => "Running",
            JobState::Suspended => "Suspended",
            JobState::ShuttingDown => "ShuttingDown",
            JobState::Completed => "Completed",
            JobState::Terminated => "Terminated",
            JobState::Killed => "Killed",
            JobState::Exception => "Exception",
            JobState::Service => "Service",
            JobState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Hyper-V operation errors with typed context.
///
/// Host-side "job already in progress" conflicts never appear here: the retry
/// policy absorbs them before anything reaches the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// A lookup or an operation's result list produced nothing.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Operation invalid for the entity's current state.
    #[error("Cannot {operation} '{entity}' in state {current}")]
    InvalidState {
        entity: String,
        current: VmState,
        operation: &'static str,
    },

    /// Entity did not reach the desired state within the budget.
    #[error(
        "Timed out after {timeout:?} waiting for '{entity}' to reach {desired}. \
         Current state: [{last_state}], status: [{status}], status descriptions: [{}]",
        .status_descriptions.join(", ")
    )]
    StateTimeout {
        entity: String,
        desired: VmState,
        timeout: Duration,
        last_state: VmState,
        status: String,
        status_descriptions: Vec<String>,
    },

    /// Job timed out waiting for completion.
    #[error("Job '{job}' for '{operation}' timed out after {timeout:?} in state {last_state}")]
    JobTimeout {
        operation: String,
        job: String,
        timeout: Duration,
        last_state: JobState,
    },

    /// Host reported an asynchronous failure.
    #[error("{operation}: job failed in state {job_state} (code {error_code}): {description}")]
    JobFailed {
        operation: String,
        error_code: u32,
        description: String,
        job_state: JobState,
    },

    /// Host rejected the call outright.
    #[error("{operation} (result code {return_value}): {message}")]
    OperationFailed {
        operation: String,
        return_value: u32,
        message: String,
    },

    /// Conflict retries hit the configured ceiling.
    #[error("{operation}: host still busy after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    /// The management transport itself failed (connectivity, marshalling).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Caller-supplied input was rejected before reaching the host.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Local file access on an image path failed.
    #[error("I/O on '{path}' failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Underlying COM/WMI call failed.
    #[cfg(windows)]
    #[error("WMI {context} failed: {source}")]
    Wmi {
        context: String,
        #[source]
        source: windows::core::Error,
    },
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(
        operation: impl Into<String>,
        return_value: u32,
        message: impl Into<String>,
    ) -> Self {
        Error::OperationFailed {
            operation: operation.into(),
            return_value,
            message: message.into(),
        }
    }

    /// Create a job failed error.
    pub fn job_failed(
        operation: impl Into<String>,
        error_code: u32,
        description: impl Into<String>,
        job_state: JobState,
    ) -> Self {
        Error::JobFailed {
            operation: operation.into(),
            error_code,
            description: description.into(),
            job_state,
        }
    }

    /// Create a validation error.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    /// Numeric code reported by the host, if this error carries one.
    pub fn host_code(&self) -> Option<u32> {
        match self {
            Error::JobFailed { error_code, .. } => Some(*error_code),
            Error::OperationFailed { return_value, .. } => Some(*return_value),
            _ => None,
        }
    }

    /// Check if this is a lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this is a state or job timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::StateTimeout { .. } | Error::JobTimeout { .. })
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for Error {
    fn from(e: windows::core::Error) -> Self {
        Error::Wmi {
            context: "call".to_string(),
            source: e,
        }
    }
}

/// Result type for Hyper-V operations.
pub type Result<T> = core::result::Result<T, Error>;
