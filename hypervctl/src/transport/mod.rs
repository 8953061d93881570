//! Abstract management transport.
//!
//! Everything above this module talks to the host through [`Transport`]. The
//! Windows build provides a WMI implementation; tests drive a scripted mock.

#[cfg(test)]
pub(crate) mod mock;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, JobState, Result};
use crate::vm::VmState;

/// Opaque identity of a host-side entity (a CIM object path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Class name encoded in the path, e.g. `Msvm_ComputerSystem`.
    pub fn class_name(&self) -> Option<&str> {
        // Key values may contain ':' and '.', so only look left of the first '='.
        let head = self.0.split('=').next()?;
        let class = head.rsplit(':').next()?.split('.').next()?;
        if class.is_empty() {
            None
        } else {
            Some(class)
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ObjectPath {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A property or method parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    U16(u16),
    U32(u32),
    U64(u64),
    String(String),
    StringArray(Vec<String>),
    Path(ObjectPath),
    PathArray(Vec<ObjectPath>),
    /// A single embedded instance, such as the system settings of a new system.
    Instance(Box<Instance>),
    /// Embedded instances, serialized by the transport on the way out.
    Instances(Vec<Instance>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Path(p) => Some(p.as_str()),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            Value::U16(v) => Some(v),
            Value::U32(v) => u16::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Value::U16(v) => Some(u32::from(v)),
            Value::U32(v) => Some(v),
            Value::U64(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U16(v) => Some(u64::from(v)),
            Value::U32(v) => Some(u64::from(v)),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<Vec<String>> {
        match self {
            Value::StringArray(v) => Some(v.clone()),
            Value::PathArray(v) => Some(v.iter().map(|p| p.to_string()).collect()),
            _ => None,
        }
    }

    /// Interpret as a list of paths; a single path yields a one-element list.
    pub fn as_paths(&self) -> Vec<ObjectPath> {
        match self {
            Value::Path(p) => vec![p.clone()],
            Value::String(s) if !s.is_empty() => vec![ObjectPath::new(s.as_str())],
            Value::PathArray(v) => v.clone(),
            Value::StringArray(v) => v.iter().map(|s| ObjectPath::new(s.as_str())).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::U16(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::U32(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::U64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<ObjectPath> for Value {
    fn from(value: ObjectPath) -> Self {
        Value::Path(value)
    }
}

impl From<Instance> for Value {
    fn from(value: Instance) -> Self {
        Value::Instance(Box::new(value))
    }
}

/// Snapshot of a host-side instance: its class, identity, and properties.
///
/// An instance without a path is a template that has not been realized on the
/// host yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    class: String,
    path: Option<ObjectPath>,
    properties: BTreeMap<String, Value>,
}

impl Instance {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            path: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<ObjectPath>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        self.path.as_ref()
    }

    /// Path of a realized instance.
    pub fn require_path(&self) -> Result<&ObjectPath> {
        self.path
            .as_ref()
            .ok_or_else(|| Error::validation("path", format!("{} instance is not realized", self.class)))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_u16(&self, name: &str) -> Option<u16> {
        self.get(name).and_then(Value::as_u16)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_string_array(&self, name: &str) -> Vec<String> {
        self.get(name)
            .and_then(Value::as_string_array)
            .unwrap_or_default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.properties.insert(name.to_string(), value.into());
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Named inputs for a management method call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodInputs {
    params: Vec<(String, Value)>,
}

impl MethodInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.push((name.to_string(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Raw result of a management method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodOutput {
    pub return_value: u32,
    values: BTreeMap<String, Value>,
}

impl MethodOutput {
    pub fn new(return_value: u32) -> Self {
        Self {
            return_value,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Paths returned under `name`, empty if absent.
    pub fn paths(&self, name: &str) -> Vec<ObjectPath> {
        self.get(name).map(Value::as_paths).unwrap_or_default()
    }

    /// Job reference returned alongside a "started" code.
    pub fn job(&self) -> Option<JobHandle> {
        self.paths("Job").into_iter().next().map(JobHandle::new)
    }
}

/// Reference to a host-side asynchronous job.
///
/// Not `Clone`: each handle is owned by exactly one wait and released once.
#[derive(Debug, PartialEq, Eq)]
pub struct JobHandle {
    path: ObjectPath,
}

impl JobHandle {
    pub fn new(path: impl Into<ObjectPath>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}

/// One observation of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub percent_complete: u32,
    pub error_code: Option<u32>,
}

impl JobStatus {
    pub fn running(percent_complete: u32) -> Self {
        Self {
            state: JobState::Running,
            percent_complete,
            error_code: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            state: JobState::Completed,
            percent_complete: 100,
            error_code: None,
        }
    }

    pub fn failed(state: JobState, error_code: u32) -> Self {
        Self {
            state,
            percent_complete: 0,
            error_code: Some(error_code),
        }
    }
}

/// Everything the library needs from the host.
///
/// Implementations report connectivity and marshalling problems as
/// [`Error::Transport`] (or [`Error::Wmi`] on Windows). Host method results,
/// including non-zero return codes, come back as [`MethodOutput`].
pub trait Transport {
    /// Invoke a named method on `target`.
    fn invoke(&self, target: &ObjectPath, method: &str, inputs: &MethodInputs)
        -> Result<MethodOutput>;

    /// Observe a job's current state.
    fn poll_job(&self, job: &JobHandle) -> Result<JobStatus>;

    /// Fetch the host's diagnostic text for a failed job.
    fn job_diagnostics(&self, job: &JobHandle) -> Result<String>;

    /// Release a job handle.
    fn close_job(&self, job: &JobHandle) -> Result<()>;

    /// Read an entity's enabled state.
    fn read_state(&self, entity: &ObjectPath) -> Result<VmState>;

    /// Read an entity's health status string.
    fn read_status(&self, entity: &ObjectPath) -> Result<String>;

    /// Read an entity's status descriptions.
    fn read_status_descriptions(&self, entity: &ObjectPath) -> Result<Vec<String>>;

    /// Run a filtered query and return matching identities.
    fn query(&self, filter: &str) -> Result<Vec<ObjectPath>>;

    /// Fetch the current property snapshot of an entity.
    fn fetch(&self, path: &ObjectPath) -> Result<Instance>;

    /// Default settings template for a resource sub-type.
    fn default_settings(&self, resource_subtype: &str) -> Result<Instance>;

    /// First match of `filter`, or `NotFound` when nothing matches.
    fn find_first(&self, filter: &str) -> Result<ObjectPath> {
        self.query(filter)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Object", filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name_from_path() {
        let path = ObjectPath::new(
            r#"\\HOST\root\virtualization\v2:Msvm_ComputerSystem.CreationClassName="Msvm_ComputerSystem",Name="1234""#,
        );
        assert_eq!(path.class_name(), Some("Msvm_ComputerSystem"));

        let path = ObjectPath::new(r#"Msvm_ConcreteJob.InstanceID="abc:def""#);
        assert_eq!(path.class_name(), Some("Msvm_ConcreteJob"));

        assert_eq!(ObjectPath::new("").class_name(), None);
    }

    #[test]
    fn test_method_output_job() {
        let out = MethodOutput::new(4096).with("Job", ObjectPath::new("job/1"));
        assert_eq!(out.job(), Some(JobHandle::new("job/1")));

        let out = MethodOutput::new(4096);
        assert!(out.job().is_none());

        let out = MethodOutput::new(4096).with("Job", "");
        assert!(out.job().is_none());
    }

    #[test]
    fn test_method_output_paths() {
        let out = MethodOutput::new(0).with(
            "ResultingResourceSettings",
            Value::StringArray(vec!["a".into(), "b".into()]),
        );
        assert_eq!(
            out.paths("ResultingResourceSettings"),
            vec![ObjectPath::new("a"), ObjectPath::new("b")]
        );
        assert!(out.paths("Missing").is_empty());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::U16(7).as_u32(), Some(7));
        assert_eq!(Value::U64(70_000).as_u16(), None);
        assert_eq!(Value::U32(70_000).as_u16(), None);
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::Bool(true).as_u32(), None);
    }

    #[test]
    fn test_instance_template_has_no_path() {
        let instance = Instance::new("Msvm_ResourceAllocationSettingData").with("ResourceType", 17u16);
        assert!(instance.path().is_none());
        assert!(instance.require_path().is_err());
        assert_eq!(instance.get_u16("ResourceType"), Some(17));
    }
}
