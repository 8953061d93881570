//! Synthetic network adapters, their switch ports and bandwidth limits.

use tracing::info;

use crate::error::{Error, Result};
use crate::query;
use crate::resource::{subtype, ResourceSettings, ResourceSettingsOrchestrator};
use crate::transport::{ObjectPath, Transport};
use crate::vm::Transition;

use super::VirtualSwitch;

const PORT_ENABLED: u16 = 2;
const BITS_PER_MEGABIT: u64 = 1_000_000;
/// Reservation is expressed in units of 100 kbit/s.
const RESERVATION_UNIT: u64 = 100_000;

/// Outbound bandwidth limits for an adapter port, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandwidthLimit {
    pub limit: u64,
    pub reservation: u64,
}

impl BandwidthLimit {
    /// Convert from megabits per second. Negative values mean zero.
    pub fn from_mbps(limit_mbps: i64, reservation_mbps: i64) -> Self {
        Self {
            limit: clamp(limit_mbps).saturating_mul(BITS_PER_MEGABIT),
            reservation: clamp(reservation_mbps).saturating_mul(RESERVATION_UNIT),
        }
    }

    fn apply(&self, feature: &mut ResourceSettings) {
        feature.set("Limit", self.limit);
        feature.set("Reservation", self.reservation);
    }
}

fn clamp(mbps: i64) -> u64 {
    u64::try_from(mbps).unwrap_or(0)
}

fn require_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("name", "adapter name must not be empty"));
    }
    Ok(())
}

impl<T: Transport + ?Sized> ResourceSettingsOrchestrator<'_, T> {
    /// Synthetic network adapters in a VM's current configuration.
    pub fn network_adapters(&self, vm: &ObjectPath) -> Result<Vec<ResourceSettings>> {
        let settings = self.system_settings(vm)?;
        self.related(
            settings.require_path()?,
            query::SYNTHETIC_ETHERNET_PORT_SETTING_DATA,
        )
    }

    pub fn find_network_adapter(&self, vm: &ObjectPath, name: &str) -> Result<ResourceSettings> {
        self.network_adapters(vm)?
            .into_iter()
            .find(|a| a.element_name() == Some(name))
            .ok_or_else(|| Error::not_found("Network adapter", name))
    }

    pub fn add_network_adapter(&self, vm: &ObjectPath, name: &str) -> Result<ResourceSettings> {
        require_name(name)?;
        let mut adapter = self.default_settings(subtype::SYNTHETIC_ETHERNET_PORT)?;
        adapter.set_element_name(name);

        let added = self.add_resource_settings(vm, &[adapter])?;
        let adapter = added
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Network adapter", name))?;
        info!(vm = %vm, adapter = name, "Added network adapter");
        Ok(adapter)
    }

    /// Remove every adapter called `name`. Returns how many were removed.
    pub fn remove_network_adapter(&self, vm: &ObjectPath, name: &str) -> Result<usize> {
        require_name(name)?;
        let matching: Vec<ResourceSettings> = self
            .network_adapters(vm)?
            .into_iter()
            .filter(|a| a.element_name() == Some(name))
            .collect();
        if matching.is_empty() {
            return Err(Error::not_found("Network adapter", name));
        }

        let count = matching.len();
        self.remove_resource_settings(matching)?;
        Ok(count)
    }

    /// The switch port allocated to an adapter, if any.
    pub fn port_connection(&self, adapter: &ResourceSettings) -> Result<Option<ResourceSettings>> {
        Ok(self
            .related(adapter.require_path()?, query::ETHERNET_PORT_ALLOCATION_SETTING_DATA)?
            .into_iter()
            .next())
    }

    /// Connect an adapter to a switch.
    ///
    /// An existing port is re-enabled and pointed at the switch; otherwise a
    /// new port is allocated.
    pub fn connect_adapter(
        &self,
        vm: &ObjectPath,
        name: &str,
        switch: &VirtualSwitch,
    ) -> Result<ResourceSettings> {
        let adapter = self.find_network_adapter(vm, name)?;
        let target = vec![switch.path().as_str().to_string()];

        let connected = match self.port_connection(&adapter)? {
            Some(mut port) => {
                port.set("EnabledState", PORT_ENABLED);
                port.set_host_resource(target);
                self.modify_resource_settings(&[port])?
            }
            None => {
                let mut port = self.default_settings(subtype::ETHERNET_CONNECTION)?;
                port.set_parent(adapter.require_path()?);
                port.set_host_resource(target);
                self.add_resource_settings(vm, &[port])?
            }
        };

        let port = connected
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Switch port", name))?;
        info!(vm = %vm, adapter = name, switch = switch.name(), "Connected network adapter");
        Ok(port)
    }

    pub fn disconnect_adapter(&self, vm: &ObjectPath, name: &str) -> Result<Transition> {
        let adapter = self.find_network_adapter(vm, name)?;
        match self.port_connection(&adapter)? {
            None => Ok(Transition::AlreadyInState),
            Some(port) => {
                self.remove_resource_settings(vec![port])?;
                info!(vm = %vm, adapter = name, "Disconnected network adapter");
                Ok(Transition::Completed)
            }
        }
    }

    /// Limit an adapter's outbound bandwidth.
    ///
    /// An adapter with no port gets an unconnected one first, since the limit
    /// is a feature of the port.
    pub fn set_adapter_bandwidth(
        &self,
        vm: &ObjectPath,
        name: &str,
        limit_mbps: i64,
        reservation_mbps: i64,
    ) -> Result<ResourceSettings> {
        let bandwidth = BandwidthLimit::from_mbps(limit_mbps, reservation_mbps);
        let adapter = self.find_network_adapter(vm, name)?;

        let port = match self.port_connection(&adapter)? {
            Some(port) => port,
            None => {
                let mut port = self.default_settings(subtype::ETHERNET_CONNECTION)?;
                port.set_parent(adapter.require_path()?);
                self.add_resource_settings(vm, &[port])?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::not_found("Switch port", name))?
            }
        };
        let port_path = port.require_path()?;

        let existing = self
            .related(port_path, query::BANDWIDTH_SETTING_DATA)?
            .into_iter()
            .next();
        let applied = match existing {
            Some(mut feature) => {
                bandwidth.apply(&mut feature);
                self.modify_feature_settings(&[feature])?
            }
            None => {
                let mut feature = self.default_settings(subtype::PORT_BANDWIDTH)?;
                bandwidth.apply(&mut feature);
                self.add_feature_settings(port_path, &[feature])?
            }
        };

        info!(
            vm = %vm,
            adapter = name,
            limit = bandwidth.limit,
            reservation = bandwidth.reservation,
            "Set adapter bandwidth"
        );
        applied
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Bandwidth settings", name))
    }
}
