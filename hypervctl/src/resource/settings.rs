use core::fmt;

use crate::error::Result;
use crate::transport::{Instance, ObjectPath, Value};

/// Resource sub-types used to look up default settings templates.
pub mod subtype {
    pub const SCSI_CONTROLLER: &str = "Microsoft:Hyper-V:Synthetic SCSI Controller";
    pub const SYNTHETIC_DISK_DRIVE: &str = "Microsoft:Hyper-V:Synthetic Disk Drive";
    pub const VIRTUAL_HARD_DISK: &str = "Microsoft:Hyper-V:Virtual Hard Disk";
    pub const SYNTHETIC_ETHERNET_PORT: &str = "Microsoft:Hyper-V:Synthetic Ethernet Port";
    pub const ETHERNET_CONNECTION: &str = "Microsoft:Hyper-V:Ethernet Connection";
    pub const PORT_BANDWIDTH: &str = "Microsoft:Hyper-V:Ethernet Switch Port Bandwidth Settings";
    pub const PROCESSOR: &str = "Microsoft:Hyper-V:Processor";
    pub const MEMORY: &str = "Microsoft:Hyper-V:Memory";
}

/// CIM resource type (CIM_ResourceAllocationSettingData.ResourceType).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Other,
    ComputerSystem,
    Processor,
    Memory,
    IdeController,
    ParallelScsiHba,
    EthernetAdapter,
    DvdDrive,
    DiskDrive,
    LogicalDisk,
    EthernetConnection,
    /// Any value without a dedicated variant.
    Unrecognized(u16),
}

impl ResourceType {
    pub fn value(&self) -> u16 {
        match self {
            ResourceType::Other => 1,
            ResourceType::ComputerSystem => 2,
            ResourceType::Processor => 3,
            ResourceType::Memory => 4,
            ResourceType::IdeController => 5,
            ResourceType::ParallelScsiHba => 6,
            ResourceType::EthernetAdapter => 10,
            ResourceType::DvdDrive => 16,
            ResourceType::DiskDrive => 17,
            ResourceType::LogicalDisk => 31,
            ResourceType::EthernetConnection => 33,
            ResourceType::Unrecognized(v) => *v,
        }
    }

    /// Whether this resource occupies an address on a storage controller.
    pub fn is_drive(&self) -> bool {
        matches!(self, ResourceType::DiskDrive | ResourceType::DvdDrive)
    }
}

impl From<u16> for ResourceType {
    fn from(value: u16) -> Self {
        match value {
            1 => ResourceType::Other,
            2 => ResourceType::ComputerSystem,
            3 => ResourceType::Processor,
            4 => ResourceType::Memory,
            5 => ResourceType::IdeController,
            6 => ResourceType::ParallelScsiHba,
            10 => ResourceType::EthernetAdapter,
            16 => ResourceType::DvdDrive,
            17 => ResourceType::DiskDrive,
            31 => ResourceType::LogicalDisk,
            33 => ResourceType::EthernetConnection,
            other => ResourceType::Unrecognized(other),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Other => write!(f, "Other"),
            ResourceType::ComputerSystem => write!(f, "Computer System"),
            ResourceType::Processor => write!(f, "Processor"),
            ResourceType::Memory => write!(f, "Memory"),
            ResourceType::IdeController => write!(f, "IDE Controller"),
            ResourceType::ParallelScsiHba => write!(f, "Parallel SCSI HBA"),
            ResourceType::EthernetAdapter => write!(f, "Ethernet Adapter"),
            ResourceType::DvdDrive => write!(f, "DVD drive"),
            ResourceType::DiskDrive => write!(f, "Disk Drive"),
            ResourceType::LogicalDisk => write!(f, "Logical Disk"),
            ResourceType::EthernetConnection => write!(f, "Ethernet Connection"),
            ResourceType::Unrecognized(v) => write!(f, "Resource type {}", v),
        }
    }
}

/// A resource or feature settings record.
///
/// Either a template (no path yet) or a realized record. A realized record is
/// superseded by the one the host returns after every modify.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSettings(Instance);

impl ResourceSettings {
    pub fn from_instance(instance: Instance) -> Self {
        Self(instance)
    }

    pub fn instance(&self) -> &Instance {
        &self.0
    }

    pub fn into_instance(self) -> Instance {
        self.0
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        self.0.path()
    }

    pub fn require_path(&self) -> Result<&ObjectPath> {
        self.0.require_path()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.set(name, value);
    }

    pub fn resource_type(&self) -> ResourceType {
        ResourceType::from(self.0.get_u16("ResourceType").unwrap_or(0))
    }

    pub fn resource_sub_type(&self) -> Option<&str> {
        self.0.get_str("ResourceSubType")
    }

    pub fn element_name(&self) -> Option<&str> {
        self.0.get_str("ElementName")
    }

    pub fn set_element_name(&mut self, name: &str) {
        self.set("ElementName", name);
    }

    /// Owning controller, drive or adapter.
    pub fn parent(&self) -> Option<ObjectPath> {
        self.0
            .get_str("Parent")
            .filter(|p| !p.is_empty())
            .map(ObjectPath::new)
    }

    pub fn set_parent(&mut self, parent: &ObjectPath) {
        self.set("Parent", parent.as_str());
    }

    /// Slot on the parent controller. Hyper-V stores it as a decimal string.
    pub fn address_on_parent(&self) -> Option<u32> {
        match self.0.get("AddressOnParent")? {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_u32(),
        }
    }

    pub fn set_address_on_parent(&mut self, address: u32) {
        self.set("AddressOnParent", address.to_string());
    }

    /// Processor count or memory size in MB.
    pub fn virtual_quantity(&self) -> Option<u64> {
        self.0.get_u64("VirtualQuantity")
    }

    pub fn set_virtual_quantity(&mut self, quantity: u64) {
        self.set("VirtualQuantity", quantity);
    }

    pub fn host_resource(&self) -> Vec<String> {
        self.0.get_string_array("HostResource")
    }

    pub fn set_host_resource(&mut self, resources: Vec<String>) {
        self.set("HostResource", Value::StringArray(resources));
    }
}

impl From<Instance> for ResourceSettings {
    fn from(instance: Instance) -> Self {
        Self(instance)
    }
}
