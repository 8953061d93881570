//! Virtual machine records and lifecycle operations.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::{Instance, ObjectPath, Transport};

use super::reconciler::{StateReconciler, Transition};
use super::{RequestedState, VmState, VmStatus};

/// Host error code for a graceful shutdown the guest cannot honor.
pub const DEVICE_NOT_USABLE: u32 = 32768;

/// Represents a Hyper-V virtual machine (Msvm_ComputerSystem).
///
/// A plain record: lifecycle operations live on [`StateReconciler`] and take
/// the record by mutable reference to keep [`VmStatus`] current.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachine {
    /// VM display name (ElementName).
    name: String,
    /// VM unique identifier (Name - GUID format).
    id: String,
    /// Object path for method invocation.
    path: ObjectPath,
    /// Last known lifecycle status.
    status: VmStatus,
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>, id: impl Into<String>, path: ObjectPath) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            path,
            status: VmStatus::Unknown,
        }
    }

    /// Build from a fetched Msvm_ComputerSystem snapshot.
    pub(crate) fn from_instance(instance: &Instance) -> Result<Self> {
        let path = instance.require_path()?.clone();
        let name = instance
            .get_str("ElementName")
            .ok_or_else(|| Error::validation("ElementName", "missing on computer system"))?;
        let id = instance.get_str("Name").unwrap_or_default();
        let mut vm = Self::new(name, id, path);
        if let Some(value) = instance.get_u16("EnabledState") {
            vm.status = VmStatus::from_state(VmState::from_enabled_state(value));
        }
        Ok(vm)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: VmStatus) {
        self.status = status;
    }

    fn invalid(&self, current: VmState, operation: &'static str) -> Error {
        Error::InvalidState {
            entity: self.name.clone(),
            current,
            operation,
        }
    }
}

impl<T: Transport + ?Sized> StateReconciler<'_, T> {
    /// Read the VM's state and refresh its status from it.
    pub fn refresh(&self, vm: &mut VirtualMachine) -> Result<VmState> {
        let state = self.current_state(vm.path())?;
        vm.status = VmStatus::from_state(state);
        Ok(state)
    }

    /// Re-derive status after a failed operation. Best effort.
    fn settle<R>(&self, vm: &mut VirtualMachine, result: Result<R>) -> Result<R> {
        if result.is_err() {
            if let Err(e) = self.refresh(vm) {
                warn!(vm = %vm.name, error = %e, "Could not refresh status after failure");
            }
        }
        result
    }

    fn drive(
        &self,
        vm: &mut VirtualMachine,
        requested: RequestedState,
        desired: VmState,
        done: VmStatus,
    ) -> Result<()> {
        debug!(vm = %vm.name, status = %vm.status, requested = %requested, "Driving state");
        let result = self.change_state(vm.path(), requested).and_then(|_| {
            self.wait_for_state(vm.path(), desired, self.config.state_change_timeout)
        });
        self.settle(vm, result)?;
        vm.status = done;
        Ok(())
    }

    /// Start the VM.
    pub fn start(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        let state = self.refresh(vm)?;
        if state.matches(VmState::Running) {
            return Ok(Transition::AlreadyInState);
        }
        if state.is_busy() {
            return Err(vm.invalid(state, "start"));
        }

        info!(vm = %vm.name, "Starting");
        vm.status = VmStatus::Starting;
        self.drive(vm, RequestedState::Running, VmState::Running, VmStatus::Running)?;
        Ok(Transition::Completed)
    }

    /// Stop the VM, gracefully unless `force` is set.
    ///
    /// A graceful stop the guest cannot honor (host code 32768) is escalated
    /// to a single forced stop.
    pub fn stop(&self, vm: &mut VirtualMachine, force: bool) -> Result<Transition> {
        let state = self.refresh(vm)?;
        if state.matches(VmState::Off) {
            return Ok(Transition::AlreadyInState);
        }
        if !force && state.is_busy() {
            return Err(vm.invalid(state, "stop"));
        }

        info!(vm = %vm.name, force, "Stopping");
        vm.status = VmStatus::Stopping;
        let result = self.halt(vm, force);
        self.settle(vm, result)?;
        vm.status = VmStatus::Stopped;
        Ok(Transition::Completed)
    }

    /// Request Off and wait for it. Leaves `vm.status` alone.
    fn halt(&self, vm: &VirtualMachine, force: bool) -> Result<()> {
        debug!(vm = %vm.name, status = %vm.status, force, "Requesting stop");
        let requested = if force {
            self.change_state(vm.path(), RequestedState::Off)
        } else {
            match self.change_state(vm.path(), RequestedState::Stopping) {
                Err(e) if e.host_code() == Some(DEVICE_NOT_USABLE) => {
                    warn!(vm = %vm.name, error = %e, "Graceful stop unavailable, forcing off");
                    self.change_state(vm.path(), RequestedState::Off)
                }
                other => other,
            }
        };
        requested.and_then(|_| {
            self.wait_for_state(vm.path(), VmState::Off, self.config.state_change_timeout)
        })
    }

    /// Stop (unless already off) and start the VM.
    ///
    /// Status stays `Rebooting` until the VM is running again.
    pub fn reboot(&self, vm: &mut VirtualMachine, force: bool) -> Result<Transition> {
        let state = self.refresh(vm)?;
        if state.is_busy() {
            return Err(vm.invalid(state, "reboot"));
        }

        info!(vm = %vm.name, force, "Rebooting");
        vm.status = VmStatus::Rebooting;
        if !state.matches(VmState::Off) {
            let result = self.halt(vm, force);
            self.settle(vm, result)?;
        }
        self.drive(vm, RequestedState::Running, VmState::Running, VmStatus::Running)?;
        Ok(Transition::Completed)
    }

    /// Save the VM's state to disk.
    pub fn suspend(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        let state = self.refresh(vm)?;
        if state.matches(VmState::Saved) {
            return Ok(Transition::AlreadyInState);
        }
        if !state.matches(VmState::Running) {
            return Err(vm.invalid(state, "suspend"));
        }

        info!(vm = %vm.name, "Saving");
        vm.status = VmStatus::Saving;
        self.drive(vm, RequestedState::Saved, VmState::Saved, VmStatus::Saved)?;
        Ok(Transition::Completed)
    }

    /// Resume a saved VM.
    pub fn resume(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        let state = self.refresh(vm)?;
        if state.matches(VmState::Running) {
            return Ok(Transition::AlreadyInState);
        }
        if !state.is_suspended() {
            return Err(vm.invalid(state, "resume"));
        }

        info!(vm = %vm.name, "Resuming");
        vm.status = VmStatus::Starting;
        self.drive(vm, RequestedState::Running, VmState::Running, VmStatus::Running)?;
        Ok(Transition::Completed)
    }

    /// Pause a running VM in memory.
    pub fn pause(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        let state = self.refresh(vm)?;
        if state.matches(VmState::Paused) {
            return Ok(Transition::AlreadyInState);
        }
        if !state.matches(VmState::Running) {
            return Err(vm.invalid(state, "pause"));
        }

        info!(vm = %vm.name, "Pausing");
        vm.status = VmStatus::Suspending;
        self.drive(vm, RequestedState::Paused, VmState::Paused, VmStatus::Suspended)?;
        Ok(Transition::Completed)
    }
}
