//! [`Transport`] over the Hyper-V WMI provider.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;
use windows::Win32::System::Wmi::IWbemClassObject;

use crate::error::{Error, JobState, Result};
use crate::transport::{
    Instance, JobHandle, JobStatus, MethodInputs, MethodOutput, ObjectPath, Transport, Value,
};
use crate::vm::VmState;

use super::{ConnectionConfig, WbemClassObjectExt, WmiConnection};

#[derive(Clone, Copy)]
enum Kind {
    Text,
    Integer,
    Wide,
    Flag,
    TextArray,
}

/// Properties carried into [`Instance`] snapshots, with their CIM types.
const PROPERTIES: &[(&str, Kind)] = &[
    ("ElementName", Kind::Text),
    ("Name", Kind::Text),
    ("InstanceID", Kind::Text),
    ("Caption", Kind::Text),
    ("Description", Kind::Text),
    ("EnabledState", Kind::Integer),
    ("HealthState", Kind::Integer),
    ("ResourceType", Kind::Integer),
    ("ResourceSubType", Kind::Text),
    ("OtherResourceType", Kind::Text),
    ("PoolID", Kind::Text),
    ("Parent", Kind::Text),
    ("Address", Kind::Text),
    ("AddressOnParent", Kind::Text),
    ("HostResource", Kind::TextArray),
    ("Connection", Kind::TextArray),
    ("VirtualSystemType", Kind::Text),
    ("VirtualSystemSubType", Kind::Text),
    ("VirtualSystemIdentifier", Kind::Text),
    ("StaticMacAddress", Kind::Flag),
    ("VirtualQuantity", Kind::Wide),
    ("Limit", Kind::Wide),
    ("Reservation", Kind::Wide),
    ("Weight", Kind::Integer),
    ("DynamicMemoryEnabled", Kind::Flag),
    ("ConfigurationDataRoot", Kind::Text),
    ("PermanentAddress", Kind::Text),
    ("Path", Kind::Text),
    ("Format", Kind::Integer),
    ("Type", Kind::Integer),
    ("MaxInternalSize", Kind::Wide),
];

/// Output parameters the library reads back from management methods.
const OUTPUTS: &[(&str, Kind)] = &[
    ("Job", Kind::Text),
    ("ResultingSystem", Kind::Text),
    ("ResultingResourceSettings", Kind::TextArray),
    ("ResultingFeatureSettings", Kind::TextArray),
    ("ErrorDescription", Kind::Text),
];

fn read_value(obj: &IWbemClassObject, name: &str, kind: Kind) -> Result<Option<Value>> {
    Ok(match kind {
        Kind::Text => obj.get_string_prop(name)?.map(Value::String),
        Kind::Integer => obj.get_u32(name)?.map(|v| match u16::try_from(v) {
            Ok(small) => Value::U16(small),
            Err(_) => Value::U32(v),
        }),
        Kind::Wide => obj.get_u64(name)?.map(Value::U64),
        Kind::Flag => obj.get_bool(name)?.map(Value::Bool),
        Kind::TextArray => obj.get_string_array(name)?.map(Value::StringArray),
    })
}

/// Talks to `root\virtualization\v2` through COM.
///
/// Every call runs on the caller's thread. COM is initialized only on the
/// thread that called [`WmiTransport::connect`]; other threads must enter
/// the multithreaded apartment themselves before using the transport.
pub struct WmiTransport {
    connection: WmiConnection,
    /// Default-settings object path per resource sub-type.
    templates: Mutex<HashMap<String, String>>,
}

impl WmiTransport {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self::from_connection(WmiConnection::connect(config)?))
    }

    pub fn from_connection(connection: WmiConnection) -> Self {
        Self {
            connection,
            templates: Mutex::new(HashMap::new()),
        }
    }

    pub fn connection(&self) -> &WmiConnection {
        &self.connection
    }

    fn to_instance(&self, obj: &IWbemClassObject, realized: bool) -> Result<Instance> {
        let class = obj.get_string_prop("__CLASS")?.unwrap_or_default();
        let mut instance = Instance::new(class);
        if realized {
            instance = instance.with_path(obj.get_path()?);
        }
        for (name, kind) in PROPERTIES {
            if let Some(value) = read_value(obj, name, *kind)? {
                instance.set(name, value);
            }
        }
        Ok(instance)
    }

    /// Realized instances start from the host's copy and templates from the
    /// default settings they came from, so properties the library never
    /// touches keep their host values.
    fn to_embedded(&self, instance: &Instance) -> Result<String> {
        let base = match instance.path() {
            Some(path) => self.connection.get_object(path.as_str())?,
            None => match self.template_path(instance) {
                Some(path) => self.connection.get_object(&path)?,
                None => self.connection.spawn_instance(instance.class())?,
            },
        };
        for (name, value) in instance.properties() {
            self.put_value(&base, name, value)?;
        }
        base.get_text()
    }

    fn template_path(&self, instance: &Instance) -> Option<String> {
        let subtype = instance.get_str("ResourceSubType")?;
        let templates = self.templates.lock().unwrap_or_else(|e| e.into_inner());
        templates.get(subtype).cloned()
    }

    fn put_value(&self, obj: &IWbemClassObject, name: &str, value: &Value) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Bool(v) => obj.put_bool(name, *v),
            Value::U16(v) => obj.put_u16(name, *v),
            Value::U32(v) => obj.put_u32(name, *v),
            Value::U64(v) => obj.put_u64(name, *v),
            Value::String(v) => obj.put_string(name, v),
            Value::Path(p) => obj.put_string(name, p.as_str()),
            Value::StringArray(v) => obj.put_string_array(name, v),
            Value::PathArray(v) => {
                let paths: Vec<String> = v.iter().map(|p| p.to_string()).collect();
                obj.put_string_array(name, &paths)
            }
            Value::Instance(instance) => obj.put_string(name, &self.to_embedded(instance)?),
            Value::Instances(list) => {
                let texts = list
                    .iter()
                    .map(|i| self.to_embedded(i))
                    .collect::<Result<Vec<_>>>()?;
                obj.put_string_array(name, &texts)
            }
        }
    }
}

impl Transport for WmiTransport {
    fn invoke(
        &self,
        target: &ObjectPath,
        method: &str,
        inputs: &MethodInputs,
    ) -> Result<MethodOutput> {
        let class = target
            .class_name()
            .ok_or_else(|| Error::validation("target", format!("no class in {}", target)))?;
        let params = self.connection.get_method_params(class, method)?;
        if let Some(ref params) = params {
            for (name, value) in inputs.iter() {
                self.put_value(params, name, value)?;
            }
        }

        debug!(target = %target, method, "ExecMethod");
        let out = self
            .connection
            .exec_method(target.as_str(), method, params.as_ref())?;

        let return_value = out.get_u32("ReturnValue")?.unwrap_or(0);
        let mut output = MethodOutput::new(return_value);
        for (name, kind) in OUTPUTS {
            if let Some(value) = read_value(&out, name, *kind)? {
                output = output.with(name, value);
            }
        }
        Ok(output)
    }

    fn poll_job(&self, job: &JobHandle) -> Result<JobStatus> {
        let obj = self.connection.get_object(job.path().as_str())?;
        let state = JobState::from(obj.get_u16("JobState")?.unwrap_or(0));
        Ok(JobStatus {
            state,
            percent_complete: obj.get_u32("PercentComplete")?.unwrap_or(0),
            error_code: if state.is_failed() {
                obj.get_u32("ErrorCode")?
            } else {
                None
            },
        })
    }

    fn job_diagnostics(&self, job: &JobHandle) -> Result<String> {
        let obj = self.connection.get_object(job.path().as_str())?;
        obj.get_string_prop("ErrorDescription")?
            .or(obj.get_string_prop("ErrorSummaryDescription")?)
            .ok_or_else(|| Error::not_found("Job error description", job.path().as_str()))
    }

    fn close_job(&self, _job: &JobHandle) -> Result<()> {
        // WMI job objects are released with their COM references.
        Ok(())
    }

    fn read_state(&self, entity: &ObjectPath) -> Result<VmState> {
        let obj = self.connection.get_object(entity.as_str())?;
        Ok(VmState::from_enabled_state(
            obj.get_u16("EnabledState")?.unwrap_or(0),
        ))
    }

    fn read_status(&self, entity: &ObjectPath) -> Result<String> {
        let obj = self.connection.get_object(entity.as_str())?;
        Ok(obj.get_string_prop("Status")?.unwrap_or_default())
    }

    fn read_status_descriptions(&self, entity: &ObjectPath) -> Result<Vec<String>> {
        let obj = self.connection.get_object(entity.as_str())?;
        Ok(obj.get_string_array("StatusDescriptions")?.unwrap_or_default())
    }

    fn query(&self, filter: &str) -> Result<Vec<ObjectPath>> {
        self.connection
            .query(filter)?
            .iter()
            .map(|obj| obj.get_path().map(ObjectPath::new))
            .collect()
    }

    fn fetch(&self, path: &ObjectPath) -> Result<Instance> {
        let obj = self.connection.get_object(path.as_str())?;
        self.to_instance(&obj, true)
    }

    fn default_settings(&self, resource_subtype: &str) -> Result<Instance> {
        let path = self.connection.default_resource_path(resource_subtype)?;
        let obj = self.connection.get_object(&path)?;
        let template = self.to_instance(&obj, false)?;
        self.templates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource_subtype.to_string(), path);
        Ok(template)
    }
}
