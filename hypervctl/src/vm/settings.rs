//! Defining virtual machines and sizing their processors and memory.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::query;
use crate::resource::{subtype, ResourceSettings, ResourceSettingsOrchestrator};
use crate::transport::{Instance, MethodInputs, ObjectPath, Transport};

use super::{Generation, VirtualMachine, VmState, VmStatus};

/// Smallest memory size the host accepts, in MB.
pub const MIN_MEMORY_MB: u64 = 32;
/// 12 TB in MB.
pub const MAX_MEMORY_MB: u64 = 12 * 1024 * 1024;
pub const MAX_PROCESSOR_COUNT: u32 = 240;

/// Settings for defining a new virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSettings {
    /// VM display name.
    pub name: String,
    pub generation: Generation,
    /// Number of virtual processors (1-240).
    pub processor_count: u32,
    /// Startup memory in MB.
    pub memory_mb: u64,
    pub dynamic_memory: bool,
    /// Where the host keeps configuration files. Host default when absent.
    pub config_path: Option<String>,
}

impl VmSettings {
    /// One processor and 512 MB of static memory.
    pub fn new(name: impl Into<String>, generation: Generation) -> Self {
        Self {
            name: name.into(),
            generation,
            processor_count: 1,
            memory_mb: 512,
            dynamic_memory: false,
            config_path: None,
        }
    }

    pub fn with_processor_count(mut self, count: u32) -> Self {
        self.processor_count = count;
        self
    }

    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = mb;
        self
    }

    pub fn with_dynamic_memory(mut self, enabled: bool) -> Self {
        self.dynamic_memory = enabled;
        self
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("name", "VM name cannot be empty"));
        }
        if self.name.len() > 100 {
            return Err(Error::validation("name", "VM name cannot exceed 100 characters"));
        }
        if self
            .name
            .chars()
            .any(|c| matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        {
            return Err(Error::validation("name", "VM name contains invalid characters"));
        }
        validate_processor_count(self.processor_count)?;
        validate_memory_mb(self.memory_mb)
    }
}

pub fn validate_processor_count(count: u32) -> Result<()> {
    if count == 0 || count > MAX_PROCESSOR_COUNT {
        return Err(Error::validation(
            "processor_count",
            format!("must be between 1 and {}, got {}", MAX_PROCESSOR_COUNT, count),
        ));
    }
    Ok(())
}

pub fn validate_memory_mb(mb: u64) -> Result<()> {
    if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&mb) {
        return Err(Error::validation(
            "memory_mb",
            format!("must be between {} and {} MB, got {}", MIN_MEMORY_MB, MAX_MEMORY_MB, mb),
        ));
    }
    Ok(())
}

/// Apply a memory size to a memory record.
///
/// Static memory pins reservation and limit to the size. Dynamic memory only
/// widens its range when the new size falls outside it.
fn size_memory(record: &mut ResourceSettings, mb: u64) {
    record.set_virtual_quantity(mb);
    if record.instance().get_bool("DynamicMemoryEnabled") == Some(true) {
        if record.instance().get_u64("Reservation").is_some_and(|r| r > mb) {
            record.set("Reservation", mb);
        }
        if record.instance().get_u64("Limit").is_some_and(|l| l < mb) {
            record.set("Limit", mb);
        }
    } else {
        record.set("Reservation", mb);
        record.set("Limit", mb);
    }
}

impl<T: Transport + ?Sized> ResourceSettingsOrchestrator<'_, T> {
    pub fn processor_settings(&self, vm: &ObjectPath) -> Result<ResourceSettings> {
        self.sizing_record(vm, query::PROCESSOR_SETTING_DATA, "Processor settings")
    }

    pub fn memory_settings(&self, vm: &ObjectPath) -> Result<ResourceSettings> {
        self.sizing_record(vm, query::MEMORY_SETTING_DATA, "Memory settings")
    }

    fn sizing_record(
        &self,
        vm: &ObjectPath,
        class: &str,
        kind: &'static str,
    ) -> Result<ResourceSettings> {
        let settings = self.system_settings(vm)?;
        self.related(settings.require_path()?, class)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(kind, vm.as_str()))
    }

    /// Change the virtual processor count. The VM must be off.
    pub fn modify_processor_count(
        &self,
        vm: &VirtualMachine,
        count: u32,
    ) -> Result<ResourceSettings> {
        validate_processor_count(count)?;
        let current = self.transport.read_state(vm.path())?;
        if !current.matches(VmState::Off) {
            return Err(Error::InvalidState {
                entity: vm.name().to_string(),
                current,
                operation: "modify processor count",
            });
        }
        let updated = self.apply_processor_count(vm.path(), count)?;
        info!(vm = vm.name(), count, "Modified processor count");
        Ok(updated)
    }

    /// Change the startup memory size. Allowed while the VM runs.
    pub fn modify_memory_mb(&self, vm: &VirtualMachine, mb: u64) -> Result<ResourceSettings> {
        validate_memory_mb(mb)?;
        let updated = self.apply_memory(vm.path(), mb, None)?;
        info!(vm = vm.name(), memory_mb = mb, "Modified memory");
        Ok(updated)
    }

    fn apply_processor_count(&self, vm: &ObjectPath, count: u32) -> Result<ResourceSettings> {
        let mut record = self.processor_settings(vm)?;
        record.set_virtual_quantity(u64::from(count));
        self.modify_resource_settings(&[record])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Processor settings", vm.as_str()))
    }

    fn apply_memory(
        &self,
        vm: &ObjectPath,
        mb: u64,
        dynamic: Option<bool>,
    ) -> Result<ResourceSettings> {
        let mut record = self.memory_settings(vm)?;
        if let Some(enabled) = dynamic {
            record.set("DynamicMemoryEnabled", enabled);
        }
        size_memory(&mut record, mb);
        self.modify_resource_settings(&[record])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Memory settings", vm.as_str()))
    }

    /// Define a new virtual machine, size it and give it a SCSI controller.
    ///
    /// If sizing fails the half-built VM is destroyed again (best effort).
    pub fn define_virtual_machine(&self, settings: &VmSettings) -> Result<VirtualMachine> {
        settings.validate()?;
        if !self
            .transport
            .query(&query::virtual_machine_by_name(&settings.name))?
            .is_empty()
        {
            return Err(Error::validation(
                "name",
                format!("a VM named '{}' already exists", settings.name),
            ));
        }

        let mut system = Instance::new(query::VIRTUAL_SYSTEM_SETTING_DATA)
            .with("ElementName", settings.name.as_str())
            .with("VirtualSystemSubType", settings.generation.to_subtype())
            .with("AutomaticSnapshotsEnabled", false);
        if let Some(ref path) = settings.config_path {
            system.set("ConfigurationDataRoot", path.as_str());
        }
        let inputs = MethodInputs::new().with("SystemSettings", system);

        let output = self.call("DefineSystem", &inputs, "Failed to define virtual machine")?;
        let path = output
            .paths("ResultingSystem")
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Defined system", settings.name.as_str()))?;
        let mut vm = VirtualMachine::from_instance(&self.transport.fetch(&path)?)?;
        vm.set_status(VmStatus::Creating);
        debug!(vm = vm.name(), status = %vm.status(), "Configuring new virtual machine");

        if let Err(e) = self.configure_new(&vm, settings) {
            let inputs = MethodInputs::new().with("AffectedSystem", path);
            if let Err(rollback) =
                self.call("DestroySystem", &inputs, "Failed to delete virtual machine")
            {
                warn!(vm = %settings.name, error = %rollback, "Failed to delete virtual machine after failed create");
            }
            return Err(e);
        }

        vm.set_status(VmStatus::Stopped);
        info!(vm = %settings.name, generation = ?settings.generation, "Created virtual machine");
        Ok(vm)
    }

    fn configure_new(&self, vm: &VirtualMachine, settings: &VmSettings) -> Result<()> {
        self.apply_processor_count(vm.path(), settings.processor_count)?;
        self.apply_memory(vm.path(), settings.memory_mb, Some(settings.dynamic_memory))?;
        let controller = self.default_settings(subtype::SCSI_CONTROLLER)?;
        self.add_resource_settings(vm.path(), &[controller])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{fast_config, fixture, MockResponse, MockTransport};
    use crate::transport::Value;
    use tracing_test::traced_test;

    fn processor() -> ObjectPath {
        ObjectPath::new("Msvm_ProcessorSettingData.InstanceID=\"Microsoft:vm-1\\\\proc\"")
    }

    fn memory() -> ObjectPath {
        ObjectPath::new("Msvm_MemorySettingData.InstanceID=\"Microsoft:vm-1\\\\mem\"")
    }

    fn resulting(path: &ObjectPath) -> MockResponse {
        MockResponse::completed().with_output(
            "ResultingResourceSettings",
            Value::StringArray(vec![path.to_string()]),
        )
    }

    /// Host whose VM has one processor and 1024 MB of memory.
    fn sized_host(dynamic: bool) -> MockTransport {
        let transport = fixture::host(Generation::Gen2);
        transport.insert(
            Instance::new(query::PROCESSOR_SETTING_DATA)
                .with_path(processor())
                .with("ResourceType", 3u16)
                .with("VirtualQuantity", 1u64),
        );
        transport.insert(
            Instance::new(query::MEMORY_SETTING_DATA)
                .with_path(memory())
                .with("ResourceType", 4u16)
                .with("VirtualQuantity", 1024u64)
                .with("Reservation", 512u64)
                .with("Limit", 2048u64)
                .with("DynamicMemoryEnabled", dynamic),
        );
        transport.on_query(
            &query::associators(&fixture::settings(), query::PROCESSOR_SETTING_DATA),
            &[&processor()],
        );
        transport.on_query(
            &query::associators(&fixture::settings(), query::MEMORY_SETTING_DATA),
            &[&memory()],
        );
        transport
    }

    fn web01() -> VirtualMachine {
        VirtualMachine::new("web01", "vm-1", fixture::vm())
    }

    fn modified(transport: &MockTransport, call: usize) -> Instance {
        match transport.invocations("ModifyResourceSettings")[call]
            .inputs
            .get("ResourceSettings")
        {
            Some(Value::Instances(list)) => list[0].clone(),
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(VmSettings::new("web01", Generation::Gen2).validate().is_ok());

        let err = VmSettings::new("", Generation::Gen2).validate().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "name", .. }));
        assert!(VmSettings::new("a/b", Generation::Gen1).validate().is_err());
        assert!(VmSettings::new("x".repeat(101), Generation::Gen1).validate().is_err());

        let err = VmSettings::new("web01", Generation::Gen2)
            .with_processor_count(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "processor_count", .. }));
        assert!(VmSettings::new("web01", Generation::Gen2)
            .with_processor_count(241)
            .validate()
            .is_err());

        let err = VmSettings::new("web01", Generation::Gen2)
            .with_memory_mb(16)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "memory_mb", .. }));
    }

    #[test]
    fn test_size_memory_static_pins_range() {
        let mut record = ResourceSettings::from_instance(
            Instance::new(query::MEMORY_SETTING_DATA)
                .with("Reservation", 512u64)
                .with("Limit", 2048u64),
        );
        size_memory(&mut record, 4096);
        assert_eq!(record.virtual_quantity(), Some(4096));
        assert_eq!(record.instance().get_u64("Reservation"), Some(4096));
        assert_eq!(record.instance().get_u64("Limit"), Some(4096));
    }

    #[test]
    fn test_size_memory_dynamic_widens_range() {
        let dynamic = Instance::new(query::MEMORY_SETTING_DATA)
            .with("DynamicMemoryEnabled", true)
            .with("Reservation", 512u64)
            .with("Limit", 2048u64);

        let mut grown = ResourceSettings::from_instance(dynamic.clone());
        size_memory(&mut grown, 4096);
        assert_eq!(grown.instance().get_u64("Reservation"), Some(512));
        assert_eq!(grown.instance().get_u64("Limit"), Some(4096));

        let mut shrunk = ResourceSettings::from_instance(dynamic.clone());
        size_memory(&mut shrunk, 256);
        assert_eq!(shrunk.instance().get_u64("Reservation"), Some(256));
        assert_eq!(shrunk.instance().get_u64("Limit"), Some(2048));

        let mut inside = ResourceSettings::from_instance(dynamic);
        size_memory(&mut inside, 1024);
        assert_eq!(inside.instance().get_u64("Reservation"), Some(512));
        assert_eq!(inside.instance().get_u64("Limit"), Some(2048));
    }

    #[test]
    fn test_modify_processor_count_when_off() {
        let transport = sized_host(false);
        transport.respond("ModifyResourceSettings", resulting(&processor()));
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        let updated = orchestrator.modify_processor_count(&web01(), 4).unwrap();
        assert_eq!(updated.path(), Some(&processor()));

        let submitted = modified(&transport, 0);
        assert_eq!(submitted.path(), Some(&processor()));
        assert_eq!(submitted.get_u64("VirtualQuantity"), Some(4));
        assert_eq!(
            transport.invocations("ModifyResourceSettings")[0].target,
            fixture::service()
        );
    }

    #[test]
    fn test_modify_processor_count_requires_off() {
        for state in [VmState::Running, VmState::Paused, VmState::Saved] {
            let transport = sized_host(false);
            transport.set_state(&fixture::vm(), state);
            let orchestrator =
                ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

            let err = orchestrator.modify_processor_count(&web01(), 2).unwrap_err();
            assert!(matches!(
                err,
                Error::InvalidState { operation: "modify processor count", current, .. } if current == state
            ));
            assert_eq!(transport.total_calls(), 0);
        }
    }

    #[test]
    fn test_modify_processor_count_rejects_zero() {
        let transport = sized_host(false);
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        let err = orchestrator.modify_processor_count(&web01(), 0).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(transport.state_reads(), 0);
    }

    #[test]
    fn test_modify_memory_while_running() {
        let transport = sized_host(false);
        transport.set_state(&fixture::vm(), VmState::Running);
        transport.respond("ModifyResourceSettings", MockResponse::code(32775));
        transport.respond("ModifyResourceSettings", resulting(&memory()));
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        orchestrator.modify_memory_mb(&web01(), 4096).unwrap();

        assert_eq!(transport.calls("ModifyResourceSettings"), 2);
        let submitted = modified(&transport, 1);
        assert_eq!(submitted.get_u64("VirtualQuantity"), Some(4096));
        assert_eq!(submitted.get_u64("Reservation"), Some(4096));
        assert_eq!(submitted.get_u64("Limit"), Some(4096));
    }

    #[test]
    fn test_modify_memory_missing_record_is_not_found() {
        let transport = fixture::host(Generation::Gen2);
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        let err = orchestrator.modify_memory_mb(&web01(), 2048).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "Memory settings", .. }));
    }

    fn creatable_host() -> MockTransport {
        let transport = sized_host(false);
        transport.respond(
            "DefineSystem",
            MockResponse::completed().with_output("ResultingSystem", fixture::vm()),
        );
        transport.respond("ModifyResourceSettings", resulting(&processor()));
        transport.respond("ModifyResourceSettings", resulting(&memory()));
        transport.set_default(
            subtype::SCSI_CONTROLLER,
            Instance::new(query::RESOURCE_ALLOCATION_SETTING_DATA).with("ResourceType", 6u16),
        );
        transport.insert(
            Instance::new(query::RESOURCE_ALLOCATION_SETTING_DATA)
                .with_path("rasd/scsi-0")
                .with("ResourceType", 6u16),
        );
        transport
    }

    #[test]
    #[traced_test]
    fn test_define_virtual_machine() {
        let transport = creatable_host();
        transport.respond(
            "AddResourceSettings",
            resulting(&ObjectPath::new("rasd/scsi-0")),
        );
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        let settings = VmSettings::new("web01", Generation::Gen2)
            .with_processor_count(2)
            .with_memory_mb(2048)
            .with_config_path(r"D:\vms");
        let vm = orchestrator.define_virtual_machine(&settings).unwrap();
        assert_eq!(vm.path(), &fixture::vm());
        assert_eq!(vm.status(), VmStatus::Stopped);

        let define = &transport.invocations("DefineSystem")[0];
        assert_eq!(define.target, fixture::service());
        match define.inputs.get("SystemSettings") {
            Some(Value::Instance(system)) => {
                assert_eq!(system.class(), query::VIRTUAL_SYSTEM_SETTING_DATA);
                assert_eq!(system.get_str("ElementName"), Some("web01"));
                assert_eq!(
                    system.get_str("VirtualSystemSubType"),
                    Some(Generation::Gen2.to_subtype())
                );
                assert_eq!(system.get_str("ConfigurationDataRoot"), Some(r"D:\vms"));
                assert_eq!(system.get_bool("AutomaticSnapshotsEnabled"), Some(false));
            }
            other => panic!("unexpected input: {:?}", other),
        }

        assert_eq!(modified(&transport, 0).get_u64("VirtualQuantity"), Some(2));
        let memory = modified(&transport, 1);
        assert_eq!(memory.get_u64("VirtualQuantity"), Some(2048));
        assert_eq!(memory.get_bool("DynamicMemoryEnabled"), Some(false));
        assert_eq!(transport.calls("AddResourceSettings"), 1);
        assert_eq!(transport.calls("DestroySystem"), 0);
        assert!(logs_contain("Configuring new virtual machine vm=web01 status=Creating"));
    }

    #[test]
    fn test_define_rejects_existing_name() {
        let transport = creatable_host();
        transport.on_query(&query::virtual_machine_by_name("web01"), &[&fixture::vm()]);
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        let err = orchestrator
            .define_virtual_machine(&VmSettings::new("web01", Generation::Gen2))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "name", .. }));
        assert_eq!(transport.total_calls(), 0);
    }

    #[test]
    fn test_define_without_resulting_system_is_not_found() {
        let transport = sized_host(false);
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        let err = orchestrator
            .define_virtual_machine(&VmSettings::new("web02", Generation::Gen1))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "Defined system", .. }));
    }

    #[test]
    #[traced_test]
    fn test_define_destroys_vm_when_sizing_fails() {
        let transport = sized_host(false);
        transport.respond(
            "DefineSystem",
            MockResponse::completed().with_output("ResultingSystem", fixture::vm()),
        );
        transport.respond("ModifyResourceSettings", MockResponse::code(32773));
        transport.respond("DestroySystem", MockResponse::code(32768));
        let orchestrator = ResourceSettingsOrchestrator::from_config(&transport, &fast_config());

        let err = orchestrator
            .define_virtual_machine(&VmSettings::new("web01", Generation::Gen2))
            .unwrap_err();
        assert_eq!(err.host_code(), Some(32773));

        let destroy = transport.invocations("DestroySystem");
        assert_eq!(destroy.len(), 1);
        assert_eq!(destroy[0].inputs.get("AffectedSystem"), Some(&Value::Path(fixture::vm())));
        assert!(logs_contain("Failed to delete virtual machine after failed create"));
    }
}
