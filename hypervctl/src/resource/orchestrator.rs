//! Adding, modifying and removing resource and feature settings.

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::JobWaitConfig;
use crate::query;
use crate::retry::RetryPolicy;
use crate::transport::{Instance, MethodInputs, MethodOutput, ObjectPath, Transport, Value};

use super::ResourceSettings;

const SNAPSHOT_SYSTEM_TYPE: &str = "Microsoft:Hyper-V:Snapshot:Realized";

/// Submits settings changes to the virtual system management service.
///
/// Every call goes through the retry policy, and every call that yields
/// records treats an empty result as `NotFound`.
pub struct ResourceSettingsOrchestrator<'a, T: Transport + ?Sized> {
    pub(crate) transport: &'a T,
    retry: RetryPolicy,
    wait: JobWaitConfig,
}

impl<'a, T: Transport + ?Sized> ResourceSettingsOrchestrator<'a, T> {
    pub fn new(transport: &'a T, retry: RetryPolicy, wait: JobWaitConfig) -> Self {
        Self {
            transport,
            retry,
            wait,
        }
    }

    pub fn from_config(transport: &'a T, config: &Config) -> Self {
        Self::new(transport, config.retry_policy(), config.job_wait())
    }

    // ========== Lookups ==========

    pub fn management_service(&self) -> Result<ObjectPath> {
        self.service(query::VIRTUAL_SYSTEM_MANAGEMENT_SERVICE)
    }

    /// The singleton instance of a host service class.
    pub fn service(&self, class: &'static str) -> Result<ObjectPath> {
        self.transport
            .find_first(&query::singleton(class))
            .map_err(|e| match e {
                Error::NotFound { .. } => Error::not_found("Service", class),
                other => other,
            })
    }

    /// Current (non-snapshot) configuration of a virtual machine.
    pub fn system_settings(&self, vm: &ObjectPath) -> Result<Instance> {
        let filter = query::associators(vm, query::VIRTUAL_SYSTEM_SETTING_DATA);
        for path in self.transport.query(&filter)? {
            let settings = self.transport.fetch(&path)?;
            if settings.get_str("VirtualSystemType") == Some(SNAPSHOT_SYSTEM_TYPE) {
                continue;
            }
            return Ok(settings);
        }
        Err(Error::not_found("Virtual system settings", vm.as_str()))
    }

    /// Records of `class` associated with `path`.
    pub fn related(&self, path: &ObjectPath, class: &str) -> Result<Vec<ResourceSettings>> {
        self.transport
            .query(&query::associators(path, class))?
            .iter()
            .map(|p| self.transport.fetch(p).map(ResourceSettings::from_instance))
            .collect()
    }

    /// Default settings template for a resource sub-type.
    pub fn default_settings(&self, resource_subtype: &str) -> Result<ResourceSettings> {
        self.transport
            .default_settings(resource_subtype)
            .map(ResourceSettings::from_instance)
    }

    // ========== Resource settings ==========

    /// Add resources to a VM's current configuration.
    pub fn add_resource_settings(
        &self,
        vm: &ObjectPath,
        prototypes: &[ResourceSettings],
    ) -> Result<Vec<ResourceSettings>> {
        let settings = self.system_settings(vm)?;
        self.add_to_configuration(settings.require_path()?, prototypes)
    }

    /// Add resources to a specific configuration.
    pub fn add_to_configuration(
        &self,
        configuration: &ObjectPath,
        prototypes: &[ResourceSettings],
    ) -> Result<Vec<ResourceSettings>> {
        self.add_settings_on(query::VIRTUAL_SYSTEM_MANAGEMENT_SERVICE, configuration, prototypes)
    }

    pub(crate) fn add_settings_on(
        &self,
        service: &'static str,
        configuration: &ObjectPath,
        prototypes: &[ResourceSettings],
    ) -> Result<Vec<ResourceSettings>> {
        require_nonempty("ResourceSettings", prototypes)?;
        let inputs = MethodInputs::new()
            .with("AffectedConfiguration", configuration.clone())
            .with("ResourceSettings", embedded(prototypes));

        let output = self.call_on(
            service,
            "AddResourceSettings",
            &inputs,
            "Failed to add resource settings",
        )?;
        let added = self.resolve(&output, "ResultingResourceSettings", "Added resource settings")?;
        info!(configuration = %configuration, count = added.len(), "Added resource settings");
        Ok(added)
    }

    /// Apply changes to realized records, returning the records that supersede them.
    pub fn modify_resource_settings(
        &self,
        records: &[ResourceSettings],
    ) -> Result<Vec<ResourceSettings>> {
        require_nonempty("ResourceSettings", records)?;
        require_realized(records)?;
        let inputs = MethodInputs::new().with("ResourceSettings", embedded(records));

        let output =
            self.call("ModifyResourceSettings", &inputs, "Failed to modify resource settings")?;
        self.resolve(&output, "ResultingResourceSettings", "Modified resource settings")
    }

    /// Remove realized records. The records are consumed.
    pub fn remove_resource_settings(&self, records: Vec<ResourceSettings>) -> Result<()> {
        self.remove_settings_on(query::VIRTUAL_SYSTEM_MANAGEMENT_SERVICE, records)
    }

    pub(crate) fn remove_settings_on(
        &self,
        service: &'static str,
        records: Vec<ResourceSettings>,
    ) -> Result<()> {
        require_nonempty("ResourceSettings", &records)?;
        let inputs = MethodInputs::new().with("ResourceSettings", paths_of(&records)?);

        self.call_on(
            service,
            "RemoveResourceSettings",
            &inputs,
            "Failed to remove resource settings",
        )?;
        info!(count = records.len(), "Removed resource settings");
        Ok(())
    }

    // ========== Feature settings ==========

    /// Attach feature settings to a realized resource record.
    pub fn add_feature_settings(
        &self,
        affected: &ObjectPath,
        features: &[ResourceSettings],
    ) -> Result<Vec<ResourceSettings>> {
        require_nonempty("FeatureSettings", features)?;
        let inputs = MethodInputs::new()
            .with("AffectedConfiguration", affected.clone())
            .with("FeatureSettings", embedded(features));

        let output = self.call("AddFeatureSettings", &inputs, "Failed to add feature settings")?;
        self.resolve(&output, "ResultingFeatureSettings", "Added feature settings")
    }

    pub fn modify_feature_settings(
        &self,
        features: &[ResourceSettings],
    ) -> Result<Vec<ResourceSettings>> {
        require_nonempty("FeatureSettings", features)?;
        require_realized(features)?;
        let inputs = MethodInputs::new().with("FeatureSettings", embedded(features));

        let output =
            self.call("ModifyFeatureSettings", &inputs, "Failed to modify feature settings")?;
        self.resolve(&output, "ResultingFeatureSettings", "Modified feature settings")
    }

    pub fn remove_feature_settings(&self, features: Vec<ResourceSettings>) -> Result<()> {
        require_nonempty("FeatureSettings", &features)?;
        let inputs = MethodInputs::new().with("FeatureSettings", paths_of(&features)?);

        self.call("RemoveFeatureSettings", &inputs, "Failed to remove feature settings")?;
        Ok(())
    }

    // ========== Helpers ==========

    pub(crate) fn call(
        &self,
        method: &str,
        inputs: &MethodInputs,
        operation: &str,
    ) -> Result<MethodOutput> {
        self.call_on(query::VIRTUAL_SYSTEM_MANAGEMENT_SERVICE, method, inputs, operation)
    }

    /// Invoke `method` on the singleton `service` through the retry policy.
    pub(crate) fn call_on(
        &self,
        service: &'static str,
        method: &str,
        inputs: &MethodInputs,
        operation: &str,
    ) -> Result<MethodOutput> {
        let target = self.service(service)?;
        debug!(method, service = %target, "Invoking management method");
        self.retry.execute(self.transport, &self.wait, operation, || {
            self.transport.invoke(&target, method, inputs)
        })
    }

    pub(crate) fn resolve(
        &self,
        output: &MethodOutput,
        key: &str,
        kind: &'static str,
    ) -> Result<Vec<ResourceSettings>> {
        let paths = output.paths(key);
        if paths.is_empty() {
            return Err(Error::not_found(kind, key));
        }
        paths
            .iter()
            .map(|p| self.transport.fetch(p).map(ResourceSettings::from_instance))
            .collect()
    }
}

pub(crate) fn embedded(records: &[ResourceSettings]) -> Value {
    Value::Instances(records.iter().map(|r| r.instance().clone()).collect())
}

fn paths_of(records: &[ResourceSettings]) -> Result<Value> {
    records
        .iter()
        .map(|r| r.require_path().cloned())
        .collect::<Result<Vec<_>>>()
        .map(Value::PathArray)
}

pub(crate) fn require_nonempty(field: &'static str, records: &[ResourceSettings]) -> Result<()> {
    if records.is_empty() {
        return Err(Error::validation(field, "at least one record is required"));
    }
    Ok(())
}

fn require_realized(records: &[ResourceSettings]) -> Result<()> {
    records.iter().try_for_each(|r| r.require_path().map(|_| ()))
}
