//! Attaching and detaching virtual hard disks.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::query;
use crate::resource::{subtype, ResourceSettings, ResourceSettingsOrchestrator, ResourceType};
use crate::transport::{ObjectPath, Transport};
use crate::vm::Generation;

/// How the guest will use a disk. Decides which controller it lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskRole {
    /// Boot disk. Generation 1 VMs boot from IDE.
    System,
    /// Any other disk, always on SCSI.
    #[default]
    Data,
}

/// The drive and disk records created by an attach.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskAttachment {
    pub controller: ObjectPath,
    pub address: u32,
    pub drive: ResourceSettings,
    pub disk: ResourceSettings,
}

/// Lowest address not in `occupied`.
pub fn first_free_address(occupied: impl IntoIterator<Item = u32>) -> u32 {
    let taken: BTreeSet<u32> = occupied.into_iter().collect();
    let mut address = 0;
    while taken.contains(&address) {
        address += 1;
    }
    address
}

fn first(records: Vec<ResourceSettings>, kind: &'static str) -> Result<ResourceSettings> {
    records
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(kind, "empty result"))
}

impl<T: Transport + ?Sized> ResourceSettingsOrchestrator<'_, T> {
    /// Controllers of the given type in a VM's current configuration.
    pub fn storage_controllers(
        &self,
        vm: &ObjectPath,
        kind: ResourceType,
    ) -> Result<Vec<ResourceSettings>> {
        let settings = self.system_settings(vm)?;
        Ok(self
            .related(settings.require_path()?, query::RESOURCE_ALLOCATION_SETTING_DATA)?
            .into_iter()
            .filter(|r| r.resource_type() == kind)
            .collect())
    }

    pub fn add_scsi_controller(&self, vm: &ObjectPath) -> Result<ResourceSettings> {
        let template = self.default_settings(subtype::SCSI_CONTROLLER)?;
        let added = self.add_resource_settings(vm, &[template])?;
        first(added, "SCSI controller")
    }

    /// Addresses already taken by drives on `controller`.
    pub fn occupied_addresses(&self, controller: &ObjectPath) -> Result<Vec<u32>> {
        Ok(self
            .related(controller, query::RESOURCE_ALLOCATION_SETTING_DATA)?
            .iter()
            .filter(|r| r.resource_type().is_drive())
            .filter_map(ResourceSettings::address_on_parent)
            .collect())
    }

    /// Virtual hard disks in a VM's current configuration.
    pub fn virtual_hard_disks(&self, vm: &ObjectPath) -> Result<Vec<ResourceSettings>> {
        let settings = self.system_settings(vm)?;
        Ok(self
            .related(settings.require_path()?, query::STORAGE_ALLOCATION_SETTING_DATA)?
            .into_iter()
            .filter(|r| r.resource_type() == ResourceType::LogicalDisk)
            .collect())
    }

    pub fn find_virtual_hard_disk(&self, vm: &ObjectPath, vhd_path: &str) -> Result<ResourceSettings> {
        self.virtual_hard_disks(vm)?
            .into_iter()
            .find(|d| d.host_resource().iter().any(|r| r.eq_ignore_ascii_case(vhd_path)))
            .ok_or_else(|| Error::not_found("Virtual hard disk", vhd_path))
    }

    /// Add a drive at the first free controller address, then bind the image to it.
    ///
    /// If binding fails the drive is removed again (once, best effort) and the
    /// binding error is returned.
    pub fn attach_virtual_hard_disk(
        &self,
        vm: &ObjectPath,
        vhd_path: &str,
        role: DiskRole,
    ) -> Result<DiskAttachment> {
        if vhd_path.trim().is_empty() {
            return Err(Error::validation("vhd_path", "must not be empty"));
        }

        let settings = self.system_settings(vm)?;
        let configuration = settings.require_path()?.clone();
        let generation =
            Generation::from_subtype(settings.get_str("VirtualSystemSubType").unwrap_or_default());

        let controller = self.select_controller(vm, generation, role)?;
        let controller_path = controller.require_path()?.clone();
        let address = first_free_address(self.occupied_addresses(&controller_path)?);

        let mut drive = self.default_settings(subtype::SYNTHETIC_DISK_DRIVE)?;
        drive.set_parent(&controller_path);
        drive.set_address_on_parent(address);
        let drive = first(
            self.add_to_configuration(&configuration, &[drive])?,
            "Disk drive",
        )?;

        match self.bind_image(&configuration, &drive, vhd_path) {
            Ok(disk) => {
                info!(vm = %vm, vhd = vhd_path, controller = %controller_path, address, "Attached virtual hard disk");
                Ok(DiskAttachment {
                    controller: controller_path,
                    address,
                    drive,
                    disk,
                })
            }
            Err(e) => {
                if let Err(rollback) = self.remove_resource_settings(vec![drive]) {
                    warn!(vm = %vm, error = %rollback, "Failed to remove disk drive after failed attach");
                }
                Err(e)
            }
        }
    }

    fn select_controller(
        &self,
        vm: &ObjectPath,
        generation: Generation,
        role: DiskRole,
    ) -> Result<ResourceSettings> {
        if generation == Generation::Gen1 && role == DiskRole::System {
            return self
                .storage_controllers(vm, ResourceType::IdeController)?
                .into_iter()
                .next()
                .ok_or_else(|| Error::not_found("IDE controller", vm.as_str()));
        }

        match self
            .storage_controllers(vm, ResourceType::ParallelScsiHba)?
            .into_iter()
            .next()
        {
            Some(controller) => Ok(controller),
            None => {
                info!(vm = %vm, "No SCSI controller, adding one");
                self.add_scsi_controller(vm)
            }
        }
    }

    fn bind_image(
        &self,
        configuration: &ObjectPath,
        drive: &ResourceSettings,
        vhd_path: &str,
    ) -> Result<ResourceSettings> {
        let mut disk = self.default_settings(subtype::VIRTUAL_HARD_DISK)?;
        disk.set_parent(drive.require_path()?);
        disk.set_host_resource(vec![vhd_path.to_string()]);
        first(self.add_to_configuration(configuration, &[disk])?, "Virtual hard disk")
    }

    /// Remove a disk and then the drive that held it.
    pub fn detach_virtual_hard_disk(&self, disk: ResourceSettings) -> Result<()> {
        let drive_path = disk
            .parent()
            .ok_or_else(|| Error::validation("Parent", "disk is not bound to a drive"))?;
        let drive = ResourceSettings::from_instance(self.transport.fetch(&drive_path)?);

        self.remove_resource_settings(vec![disk])?;
        self.remove_resource_settings(vec![drive])?;
        info!(drive = %drive_path, "Detached virtual hard disk");
        Ok(())
    }
}
