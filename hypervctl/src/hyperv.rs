use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::{SwitchType, VirtualSwitch};
use crate::query;
use crate::resource::{ResourceSettings, ResourceSettingsOrchestrator};
use crate::storage::{DiskAttachment, DiskRole, VhdType};
use crate::transport::{MethodInputs, Transport};
use crate::vm::{StateReconciler, Transition, VirtualMachine, VmSettings, VmState};

#[cfg(windows)]
use crate::wmi::{ConnectionConfig, WmiTransport};

/// Main entry point for Hyper-V management operations.
///
/// Holds one shared transport handle and the tunables every operation uses.
/// Cloning is cheap; clones share the transport.
pub struct HyperV<T: Transport> {
    transport: Arc<T>,
    config: Config,
}

impl<T: Transport> Clone for HyperV<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

#[cfg(windows)]
impl HyperV<WmiTransport> {
    /// Connect to the local Hyper-V WMI namespace with default settings.
    pub fn connect() -> Result<Self> {
        Self::connect_with_config(Config::default())
    }

    pub fn connect_with_config(config: Config) -> Result<Self> {
        let transport = WmiTransport::connect(&ConnectionConfig::default())?;
        Ok(Self::with_config(transport, config))
    }
}

impl<T: Transport> HyperV<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, Config::default())
    }

    pub fn with_config(transport: T, config: Config) -> Self {
        Self::from_shared(Arc::new(transport), config)
    }

    pub fn from_shared(transport: Arc<T>, config: Config) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Install the tracing subscriber at the configured log level.
    pub fn init_logging(&self) {
        crate::init_tracing(&self.config.logging.level);
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn reconciler(&self) -> StateReconciler<'_, T> {
        StateReconciler::from_config(self.transport.as_ref(), &self.config)
    }

    pub fn resources(&self) -> ResourceSettingsOrchestrator<'_, T> {
        ResourceSettingsOrchestrator::from_config(self.transport.as_ref(), &self.config)
    }

    // ========== VM Operations ==========

    /// List all virtual machines.
    pub fn list_vms(&self) -> Result<Vec<VirtualMachine>> {
        self.transport
            .query(&query::virtual_machines())?
            .iter()
            .map(|path| VirtualMachine::from_instance(&self.transport.fetch(path)?))
            .collect()
    }

    /// Get a VM by name.
    pub fn get_vm(&self, name: &str) -> Result<VirtualMachine> {
        self.find_vm(&query::virtual_machine_by_name(name), name)
    }

    /// Get a VM by ID (GUID).
    pub fn get_vm_by_id(&self, id: &str) -> Result<VirtualMachine> {
        self.find_vm(&query::virtual_machine_by_id(id), id)
    }

    fn find_vm(&self, filter: &str, key: &str) -> Result<VirtualMachine> {
        let path = self
            .transport
            .query(filter)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("VM", key))?;
        VirtualMachine::from_instance(&self.transport.fetch(&path)?)
    }

    /// Create a VM, sized and with a SCSI controller. It starts out off.
    pub fn create_vm(&self, settings: &VmSettings) -> Result<VirtualMachine> {
        self.resources().define_virtual_machine(settings)
    }

    /// Change the processor count. The VM must be off.
    pub fn set_processor_count(&self, vm: &mut VirtualMachine, count: u32) -> Result<()> {
        self.reconciler().refresh(vm)?;
        self.resources().modify_processor_count(vm, count)?;
        Ok(())
    }

    pub fn set_memory_mb(&self, vm: &VirtualMachine, mb: u64) -> Result<()> {
        self.resources().modify_memory_mb(vm, mb)?;
        Ok(())
    }

    pub fn start(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        self.reconciler().start(vm)
    }

    pub fn stop(&self, vm: &mut VirtualMachine, force: bool) -> Result<Transition> {
        self.reconciler().stop(vm, force)
    }

    pub fn reboot(&self, vm: &mut VirtualMachine, force: bool) -> Result<Transition> {
        self.reconciler().reboot(vm, force)
    }

    pub fn suspend(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        self.reconciler().suspend(vm)
    }

    pub fn resume(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        self.reconciler().resume(vm)
    }

    pub fn pause(&self, vm: &mut VirtualMachine) -> Result<Transition> {
        self.reconciler().pause(vm)
    }

    /// Delete a virtual machine. It must be off.
    pub fn delete_vm(&self, vm: &mut VirtualMachine) -> Result<()> {
        let state = self.reconciler().refresh(vm)?;
        if !state.matches(VmState::Off) {
            return Err(Error::InvalidState {
                entity: vm.name().to_string(),
                current: state,
                operation: "delete",
            });
        }

        let inputs = MethodInputs::new().with("AffectedSystem", vm.path().clone());
        self.resources()
            .call("DestroySystem", &inputs, "Failed to delete virtual machine")?;
        info!(vm = vm.name(), "Deleted virtual machine");
        Ok(())
    }

    // ========== Storage Operations ==========

    pub fn attach_vhd(
        &self,
        vm: &VirtualMachine,
        vhd_path: &str,
        role: DiskRole,
    ) -> Result<DiskAttachment> {
        self.resources()
            .attach_virtual_hard_disk(vm.path(), vhd_path, role)
    }

    /// Detach the disk backed by `vhd_path` and remove its drive.
    pub fn detach_vhd(&self, vm: &VirtualMachine, vhd_path: &str) -> Result<()> {
        let resources = self.resources();
        let disk = resources.find_virtual_hard_disk(vm.path(), vhd_path)?;
        resources.detach_virtual_hard_disk(disk)
    }

    pub fn create_vhd(&self, path: &str, size_bytes: u64, vhd_type: VhdType) -> Result<()> {
        self.resources().create_vhd(path, size_bytes, vhd_type)
    }

    pub fn resize_vhd(&self, path: &str, size_bytes: u64) -> Result<()> {
        self.resources().resize_vhd(path, size_bytes)
    }

    pub fn delete_vhd(&self, path: &str) -> Result<()> {
        self.resources().delete_vhd(path)
    }

    // ========== Network Operations ==========

    pub fn list_switches(&self) -> Result<Vec<VirtualSwitch>> {
        self.transport
            .query(&query::switches())?
            .iter()
            .map(|path| VirtualSwitch::from_instance(&self.transport.fetch(path)?))
            .collect()
    }

    pub fn get_switch(&self, name: &str) -> Result<VirtualSwitch> {
        let path = self
            .transport
            .query(&query::switch_by_name(name))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Switch", name))?;
        VirtualSwitch::from_instance(&self.transport.fetch(&path)?)
    }

    /// Create a switch. External types need the name of a physical adapter.
    pub fn create_switch(
        &self,
        name: &str,
        switch_type: SwitchType,
        adapter: Option<&str>,
    ) -> Result<VirtualSwitch> {
        self.resources().create_switch(name, switch_type, adapter)
    }

    pub fn delete_switch(&self, name: &str) -> Result<()> {
        let switch = self.get_switch(name)?;
        self.resources().delete_switch(&switch)
    }

    pub fn switch_type(&self, name: &str) -> Result<SwitchType> {
        let switch = self.get_switch(name)?;
        self.resources().switch_type(&switch)
    }

    pub fn change_switch_type(
        &self,
        name: &str,
        switch_type: SwitchType,
        adapter: Option<&str>,
    ) -> Result<()> {
        let switch = self.get_switch(name)?;
        self.resources().change_switch_type(&switch, switch_type, adapter)
    }

    pub fn list_network_adapters(&self, vm: &VirtualMachine) -> Result<Vec<ResourceSettings>> {
        self.resources().network_adapters(vm.path())
    }

    pub fn add_network_adapter(&self, vm: &VirtualMachine, name: &str) -> Result<ResourceSettings> {
        self.resources().add_network_adapter(vm.path(), name)
    }

    pub fn remove_network_adapter(&self, vm: &VirtualMachine, name: &str) -> Result<usize> {
        self.resources().remove_network_adapter(vm.path(), name)
    }

    /// Connect the named adapter to the named switch.
    pub fn connect_adapter(
        &self,
        vm: &VirtualMachine,
        adapter: &str,
        switch: &str,
    ) -> Result<ResourceSettings> {
        let switch = self.get_switch(switch)?;
        self.resources().connect_adapter(vm.path(), adapter, &switch)
    }

    pub fn disconnect_adapter(&self, vm: &VirtualMachine, adapter: &str) -> Result<Transition> {
        self.resources().disconnect_adapter(vm.path(), adapter)
    }

    pub fn set_adapter_bandwidth(
        &self,
        vm: &VirtualMachine,
        adapter: &str,
        limit_mbps: i64,
        reservation_mbps: i64,
    ) -> Result<ResourceSettings> {
        self.resources()
            .set_adapter_bandwidth(vm.path(), adapter, limit_mbps, reservation_mbps)
    }
}
