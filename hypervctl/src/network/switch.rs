//! Virtual switches and the ports that give them their type.

use std::fmt;

use tracing::info;

use crate::error::{Error, Result};
use crate::query;
use crate::resource::{embedded, subtype, ResourceSettings, ResourceSettingsOrchestrator};
use crate::transport::{Instance, MethodInputs, ObjectPath, Transport};

/// Virtual switch type, derived from the switch's ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchType {
    /// Only accessible between VMs.
    Private,
    /// Accessible from the host and VMs.
    Internal,
    /// Bound to a physical adapter, shared with the host.
    ExternalBridge,
    /// Bound to a physical adapter, not shared with the host.
    ExternalDirect,
}

impl SwitchType {
    pub fn is_external(&self) -> bool {
        matches!(self, SwitchType::ExternalBridge | SwitchType::ExternalDirect)
    }

    fn has_host_port(&self) -> bool {
        matches!(self, SwitchType::Internal | SwitchType::ExternalBridge)
    }
}

impl fmt::Display for SwitchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchType::Private => "Private",
            SwitchType::Internal => "Internal",
            SwitchType::ExternalBridge => "External (shared with host)",
            SwitchType::ExternalDirect => "External",
        };
        write!(f, "{}", s)
    }
}

/// Represents a Hyper-V virtual switch (Msvm_VirtualEthernetSwitch).
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualSwitch {
    /// Switch display name.
    name: String,
    /// Switch unique ID.
    id: String,
    /// Object path, used as the HostResource of port connections.
    path: ObjectPath,
}

impl VirtualSwitch {
    pub fn new(name: impl Into<String>, id: impl Into<String>, path: ObjectPath) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            path,
        }
    }

    pub(crate) fn from_instance(instance: &Instance) -> Result<Self> {
        let path = instance.require_path()?.clone();
        let name = instance
            .get_str("ElementName")
            .ok_or_else(|| Error::validation("ElementName", "missing on virtual switch"))?;
        let id = instance.get_str("Name").unwrap_or_default();
        Ok(Self::new(name, id, path))
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
}

fn validate(name: &str, switch_type: SwitchType, adapter: Option<&str>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("name", "switch name must not be empty"));
    }
    if switch_type.is_external() && adapter.map_or(true, |a| a.trim().is_empty()) {
        return Err(Error::validation(
            "adapter",
            "external switches require a physical network adapter",
        ));
    }
    Ok(())
}

/// Classify a switch by the kinds of port it has.
fn classify(ports: &[ResourceSettings]) -> SwitchType {
    let mut host = false;
    let mut external = false;
    for port in ports {
        let Some(target) = port.host_resource().into_iter().next() else {
            continue;
        };
        match ObjectPath::new(target).class_name() {
            Some(query::COMPUTER_SYSTEM) => host = true,
            Some(query::EXTERNAL_ETHERNET_PORT) | Some(query::WIFI_PORT) => external = true,
            _ => {}
        }
    }
    match (external, host) {
        (true, true) => SwitchType::ExternalBridge,
        (true, false) => SwitchType::ExternalDirect,
        (false, true) => SwitchType::Internal,
        (false, false) => SwitchType::Private,
    }
}

impl<T: Transport + ?Sized> ResourceSettingsOrchestrator<'_, T> {
    pub fn switch_settings(&self, switch: &VirtualSwitch) -> Result<ResourceSettings> {
        self.related(switch.path(), query::VIRTUAL_ETHERNET_SWITCH_SETTING_DATA)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Switch settings", switch.name()))
    }

    /// Host and external ports of a switch. VM connections are not included.
    pub fn switch_ports(&self, switch: &VirtualSwitch) -> Result<Vec<ResourceSettings>> {
        let settings = self.switch_settings(switch)?;
        self.related(
            settings.require_path()?,
            query::ETHERNET_PORT_ALLOCATION_SETTING_DATA,
        )
    }

    pub fn switch_type(&self, switch: &VirtualSwitch) -> Result<SwitchType> {
        Ok(classify(&self.switch_ports(switch)?))
    }

    /// Define a new switch with the ports its type needs.
    pub fn create_switch(
        &self,
        name: &str,
        switch_type: SwitchType,
        adapter: Option<&str>,
    ) -> Result<VirtualSwitch> {
        validate(name, switch_type, adapter)?;
        if !self.transport.query(&query::switch_by_name(name))?.is_empty() {
            return Err(Error::validation(
                "name",
                format!("a switch named '{}' already exists", name),
            ));
        }

        let ports = self.port_templates(name, switch_type, adapter)?;
        let system =
            Instance::new(query::VIRTUAL_ETHERNET_SWITCH_SETTING_DATA).with("ElementName", name);
        let inputs = MethodInputs::new()
            .with("SystemSettings", system)
            .with("ResourceSettings", embedded(&ports));

        let output = self.call_on(
            query::VIRTUAL_ETHERNET_SWITCH_MANAGEMENT_SERVICE,
            "DefineSystem",
            &inputs,
            "Failed to create virtual switch",
        )?;
        let path = output
            .paths("ResultingSystem")
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Created switch", name))?;
        let switch = VirtualSwitch::from_instance(&self.transport.fetch(&path)?)?;
        info!(switch = name, switch_type = %switch_type, "Created virtual switch");
        Ok(switch)
    }

    pub fn delete_switch(&self, switch: &VirtualSwitch) -> Result<()> {
        let inputs = MethodInputs::new().with("AffectedSystem", switch.path().clone());
        self.call_on(
            query::VIRTUAL_ETHERNET_SWITCH_MANAGEMENT_SERVICE,
            "DestroySystem",
            &inputs,
            "Failed to delete virtual switch",
        )?;
        info!(switch = switch.name(), "Deleted virtual switch");
        Ok(())
    }

    /// Replace the switch's host and external ports with those of `switch_type`.
    ///
    /// VM connections stay in place. Changing to the current internal or
    /// private type is a no-op.
    pub fn change_switch_type(
        &self,
        switch: &VirtualSwitch,
        switch_type: SwitchType,
        adapter: Option<&str>,
    ) -> Result<()> {
        validate(switch.name(), switch_type, adapter)?;
        let settings = self.switch_settings(switch)?;
        let current = self.related(
            settings.require_path()?,
            query::ETHERNET_PORT_ALLOCATION_SETTING_DATA,
        )?;
        if classify(&current) == switch_type && !switch_type.is_external() {
            return Ok(());
        }

        let ports = self.port_templates(switch.name(), switch_type, adapter)?;
        if !current.is_empty() {
            self.remove_settings_on(query::VIRTUAL_ETHERNET_SWITCH_MANAGEMENT_SERVICE, current)?;
        }
        if !ports.is_empty() {
            self.add_settings_on(
                query::VIRTUAL_ETHERNET_SWITCH_MANAGEMENT_SERVICE,
                settings.require_path()?,
                &ports,
            )?;
        }
        info!(switch = switch.name(), switch_type = %switch_type, "Changed virtual switch type");
        Ok(())
    }

    fn port_templates(
        &self,
        name: &str,
        switch_type: SwitchType,
        adapter: Option<&str>,
    ) -> Result<Vec<ResourceSettings>> {
        let mut ports = Vec::new();
        if switch_type.has_host_port() {
            let host = self.transport.find_first(&query::host_computer_system())?;
            let mut port = self.default_settings(subtype::ETHERNET_CONNECTION)?;
            port.set_element_name(name);
            port.set_host_resource(vec![host.to_string()]);
            ports.push(port);
        }
        if let (true, Some(adapter)) = (switch_type.is_external(), adapter) {
            let physical = self.physical_port(adapter)?;
            let mut port = self.default_settings(subtype::ETHERNET_CONNECTION)?;
            port.set_element_name(adapter);
            port.set_host_resource(vec![physical.require_path()?.to_string()]);
            if let Some(address) = physical.get_str("PermanentAddress") {
                port.set("Address", address);
            }
            ports.push(port);
        }
        Ok(ports)
    }

    /// Wired port by name, falling back to a wireless one.
    fn physical_port(&self, name: &str) -> Result<Instance> {
        for class in [query::EXTERNAL_ETHERNET_PORT, query::WIFI_PORT] {
            if let Some(path) = self
                .transport
                .query(&query::physical_port_by_name(class, name))?
                .into_iter()
                .next()
            {
                return self.transport.fetch(&path);
            }
        }
        Err(Error::not_found("Physical network adapter", name))
    }
}
