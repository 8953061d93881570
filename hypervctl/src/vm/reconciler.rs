//! Driving an entity to a desired enabled state.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::JobWaitConfig;
use crate::retry::RetryPolicy;
use crate::transport::{MethodInputs, ObjectPath, Transport};
use crate::vm::VmState;

use super::RequestedState;

/// Default budget for an entity to reach a requested state.
pub const DEFAULT_STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Polling and budget settings for state waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub poll_interval: Duration,
    pub state_change_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: crate::job::DEFAULT_POLL_INTERVAL,
            state_change_timeout: DEFAULT_STATE_CHANGE_TIMEOUT,
        }
    }
}

/// Result of a state-changing operation that succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The host was asked to change state and the entity got there.
    Completed,
    /// The entity was already in the target state; nothing was sent.
    AlreadyInState,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        *self == Transition::AlreadyInState
    }
}

/// Reads, requests and waits on entity state through a transport.
pub struct StateReconciler<'a, T: Transport + ?Sized> {
    pub(crate) transport: &'a T,
    pub(crate) retry: RetryPolicy,
    pub(crate) wait: JobWaitConfig,
    pub(crate) config: ReconcileConfig,
}

impl<'a, T: Transport + ?Sized> StateReconciler<'a, T> {
    pub fn new(
        transport: &'a T,
        retry: RetryPolicy,
        wait: JobWaitConfig,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            transport,
            retry,
            wait,
            config,
        }
    }

    pub fn from_config(transport: &'a T, config: &Config) -> Self {
        Self::new(
            transport,
            config.retry_policy(),
            config.job_wait(),
            config.reconcile(),
        )
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Current enabled state of `entity`.
    pub fn current_state(&self, entity: &ObjectPath) -> Result<VmState> {
        self.transport.read_state(entity)
    }

    /// Whether `entity` is in any of `candidates`.
    pub fn require_state(&self, entity: &ObjectPath, candidates: &[VmState]) -> Result<bool> {
        let current = self.current_state(entity)?;
        Ok(candidates.iter().any(|c| current.matches(*c)))
    }

    /// Issue RequestStateChange unconditionally, absorbing busy-host conflicts.
    pub fn request_state_change(&self, entity: &ObjectPath, requested: RequestedState) -> Result<()> {
        let inputs = MethodInputs::new().with("RequestedState", requested.value());
        let operation = format!("RequestStateChange({})", requested);
        self.retry
            .execute(self.transport, &self.wait, &operation, || {
                self.transport.invoke(entity, "RequestStateChange", &inputs)
            })?;
        Ok(())
    }

    /// Request `desired` unless the entity is already there.
    ///
    /// Only the request is awaited; use [`Self::wait_for_state`] to observe
    /// the entity arriving.
    pub fn change_state(&self, entity: &ObjectPath, desired: RequestedState) -> Result<Transition> {
        let current = self.current_state(entity)?;
        if current.matches(desired.target()) {
            debug!(entity = %entity, state = %current, "Already in requested state");
            return Ok(Transition::AlreadyInState);
        }

        info!(entity = %entity, from = %current, to = %desired, "Requesting state change");
        self.request_state_change(entity, desired)?;
        Ok(Transition::Completed)
    }

    /// Poll until `entity` reports `desired` or `timeout` elapses.
    ///
    /// On timeout the error carries a best-effort report of the entity's last
    /// state, status and status descriptions.
    pub fn wait_for_state(
        &self,
        entity: &ObjectPath,
        desired: VmState,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            let current = self.current_state(entity)?;
            if current.matches(desired) {
                debug!(entity = %entity, state = %current, elapsed = ?start.elapsed(), "Reached state");
                return Ok(());
            }

            std::thread::sleep(self.config.poll_interval);

            if start.elapsed() > timeout {
                return Err(self.timeout_report(entity, desired, timeout));
            }
        }
    }

    fn timeout_report(&self, entity: &ObjectPath, desired: VmState, timeout: Duration) -> Error {
        let last_state = self
            .transport
            .read_state(entity)
            .unwrap_or(VmState::Unknown);
        let status = self
            .transport
            .read_status(entity)
            .unwrap_or_else(|e| format!("Unknown (error retrieving the status: {})", e));
        let status_descriptions = self
            .transport
            .read_status_descriptions(entity)
            .unwrap_or_else(|e| {
                vec![format!(
                    "Unknown (error retrieving the status descriptions: {})",
                    e
                )]
            });

        Error::StateTimeout {
            entity: entity.to_string(),
            desired,
            timeout,
            last_state,
            status,
            status_descriptions,
        }
    }
}
