//! WQL filters used for lookups.
//!
//! Kept in one place so transports and tests agree on the exact text.

use crate::transport::ObjectPath;

pub const VIRTUAL_SYSTEM_MANAGEMENT_SERVICE: &str = "Msvm_VirtualSystemManagementService";
pub const VIRTUAL_SYSTEM_SETTING_DATA: &str = "Msvm_VirtualSystemSettingData";
pub const RESOURCE_ALLOCATION_SETTING_DATA: &str = "Msvm_ResourceAllocationSettingData";
pub const STORAGE_ALLOCATION_SETTING_DATA: &str = "Msvm_StorageAllocationSettingData";
pub const SYNTHETIC_ETHERNET_PORT_SETTING_DATA: &str = "Msvm_SyntheticEthernetPortSettingData";
pub const ETHERNET_PORT_ALLOCATION_SETTING_DATA: &str = "Msvm_EthernetPortAllocationSettingData";
pub const BANDWIDTH_SETTING_DATA: &str = "Msvm_EthernetSwitchPortBandwidthSettingData";
pub const PROCESSOR_SETTING_DATA: &str = "Msvm_ProcessorSettingData";
pub const MEMORY_SETTING_DATA: &str = "Msvm_MemorySettingData";

pub const VIRTUAL_ETHERNET_SWITCH_MANAGEMENT_SERVICE: &str =
    "Msvm_VirtualEthernetSwitchManagementService";
pub const VIRTUAL_ETHERNET_SWITCH_SETTING_DATA: &str = "Msvm_VirtualEthernetSwitchSettingData";
pub const COMPUTER_SYSTEM: &str = "Msvm_ComputerSystem";
pub const EXTERNAL_ETHERNET_PORT: &str = "Msvm_ExternalEthernetPort";
pub const WIFI_PORT: &str = "Msvm_WiFiPort";

pub const IMAGE_MANAGEMENT_SERVICE: &str = "Msvm_ImageManagementService";
pub const VIRTUAL_HARD_DISK_SETTING_DATA: &str = "Msvm_VirtualHardDiskSettingData";

/// Escape a string for WQL query
pub fn escape_wql(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Every instance of a singleton class such as a management service.
pub fn singleton(class: &str) -> String {
    format!("SELECT * FROM {}", class)
}

pub fn virtual_machines() -> String {
    "SELECT * FROM Msvm_ComputerSystem WHERE Caption = 'Virtual Machine'".to_string()
}

pub fn virtual_machine_by_name(name: &str) -> String {
    format!(
        "SELECT * FROM Msvm_ComputerSystem WHERE Caption = 'Virtual Machine' AND ElementName = '{}'",
        escape_wql(name)
    )
}

pub fn virtual_machine_by_id(id: &str) -> String {
    format!(
        "SELECT * FROM Msvm_ComputerSystem WHERE Caption = 'Virtual Machine' AND Name = '{}'",
        escape_wql(id)
    )
}

pub fn switches() -> String {
    "SELECT * FROM Msvm_VirtualEthernetSwitch".to_string()
}

pub fn switch_by_name(name: &str) -> String {
    format!(
        "SELECT * FROM Msvm_VirtualEthernetSwitch WHERE ElementName = '{}'",
        escape_wql(name)
    )
}

/// The host itself, as opposed to its virtual machines.
pub fn host_computer_system() -> String {
    "SELECT * FROM Msvm_ComputerSystem WHERE Description != 'Microsoft Virtual Machine'".to_string()
}

/// Physical wired or wireless port by its display name.
pub fn physical_port_by_name(class: &str, name: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE ElementName = '{}'",
        class,
        escape_wql(name)
    )
}

/// Instances of `result_class` associated with `path`.
pub fn associators(path: &ObjectPath, result_class: &str) -> String {
    format!("ASSOCIATORS OF {{{}}} WHERE ResultClass = {}", path, result_class)
}
