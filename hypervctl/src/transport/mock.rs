//! Scripted in-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::{Instance, JobHandle, JobStatus, MethodInputs, MethodOutput, ObjectPath, Transport};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::vm::VmState;

/// A scripted reply to one method invocation.
#[derive(Debug, Clone)]
pub(crate) struct MockResponse {
    outcome: std::result::Result<MethodOutput, String>,
    job: Option<(ObjectPath, MockJob)>,
    effect: Option<(ObjectPath, VmState)>,
}

#[derive(Debug, Clone, Default)]
struct MockJob {
    statuses: VecDeque<JobStatus>,
    diagnostics: Option<String>,
    effect: Option<(ObjectPath, VmState)>,
}

impl MockResponse {
    /// Synchronous success.
    pub(crate) fn completed() -> Self {
        Self::code(0)
    }

    /// Any return code, no job.
    pub(crate) fn code(return_value: u32) -> Self {
        Self {
            outcome: Ok(MethodOutput::new(return_value)),
            job: None,
            effect: None,
        }
    }

    /// "Job started" with a job that reports `statuses` in order, repeating the last.
    pub(crate) fn job(path: &str, statuses: Vec<JobStatus>) -> Self {
        let path = ObjectPath::new(path);
        Self {
            outcome: Ok(MethodOutput::new(4096).with("Job", path.clone())),
            job: Some((
                path,
                MockJob {
                    statuses: statuses.into(),
                    ..MockJob::default()
                },
            )),
            effect: None,
        }
    }

    /// The transport call itself fails.
    pub(crate) fn transport_error(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            job: None,
            effect: None,
        }
    }

    pub(crate) fn with_output(mut self, name: &str, value: impl Into<super::Value>) -> Self {
        self.outcome = self.outcome.map(|out| out.with(name, value));
        self
    }

    pub(crate) fn with_diagnostics(mut self, text: &str) -> Self {
        if let Some((_, job)) = self.job.as_mut() {
            job.diagnostics = Some(text.to_string());
        }
        self
    }

    /// Move `entity` to `state` once the call (or its job) completes.
    pub(crate) fn then_state(mut self, entity: &ObjectPath, state: VmState) -> Self {
        let effect = Some((entity.clone(), state));
        match self.job.as_mut() {
            Some((_, job)) => job.effect = effect,
            None => self.effect = effect,
        }
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub target: ObjectPath,
    pub method: String,
    pub inputs: MethodInputs,
}

#[derive(Default)]
struct MockState {
    responses: HashMap<String, VecDeque<MockResponse>>,
    invocations: Vec<Invocation>,
    jobs: HashMap<ObjectPath, MockJob>,
    closed: HashMap<ObjectPath, u32>,
    states: HashMap<ObjectPath, VmState>,
    state_reads: usize,
    statuses: HashMap<ObjectPath, String>,
    descriptions: HashMap<ObjectPath, Vec<String>>,
    fail_status_reads: bool,
    queries: HashMap<String, Vec<ObjectPath>>,
    objects: HashMap<ObjectPath, Instance>,
    defaults: HashMap<String, Instance>,
}

/// In-memory [`Transport`] with scripted responses and call accounting.
#[derive(Default)]
pub(crate) struct MockTransport {
    inner: Mutex<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Queue a reply for the next call to `method`. Unscripted calls succeed with 0.
    pub(crate) fn respond(&self, method: &str, response: MockResponse) {
        self.with_state(|s| {
            s.responses
                .entry(method.to_string())
                .or_default()
                .push_back(response)
        });
    }

    pub(crate) fn set_state(&self, entity: &ObjectPath, state: VmState) {
        self.with_state(|s| s.states.insert(entity.clone(), state));
    }

    pub(crate) fn state_of(&self, entity: &ObjectPath) -> VmState {
        self.with_state(|s| s.states.get(entity).copied().unwrap_or(VmState::Unknown))
    }

    pub(crate) fn set_status(&self, entity: &ObjectPath, status: &str, descriptions: &[&str]) {
        self.with_state(|s| {
            s.statuses.insert(entity.clone(), status.to_string());
            s.descriptions.insert(
                entity.clone(),
                descriptions.iter().map(|d| d.to_string()).collect(),
            );
        });
    }

    pub(crate) fn fail_status_reads(&self) {
        self.with_state(|s| s.fail_status_reads = true);
    }

    pub(crate) fn on_query(&self, filter: &str, paths: &[&ObjectPath]) {
        self.with_state(|s| {
            s.queries
                .insert(filter.to_string(), paths.iter().map(|p| (*p).clone()).collect())
        });
    }

    /// Store a realized instance, retrievable through `fetch`.
    pub(crate) fn insert(&self, instance: Instance) {
        if let Some(path) = instance.path().cloned() {
            self.with_state(|s| s.objects.insert(path, instance));
        }
    }

    pub(crate) fn set_default(&self, subtype: &str, template: Instance) {
        self.with_state(|s| s.defaults.insert(subtype.to_string(), template));
    }

    pub(crate) fn calls(&self, method: &str) -> usize {
        self.with_state(|s| s.invocations.iter().filter(|i| i.method == method).count())
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.with_state(|s| s.invocations.len())
    }

    pub(crate) fn invocations(&self, method: &str) -> Vec<Invocation> {
        self.with_state(|s| {
            s.invocations
                .iter()
                .filter(|i| i.method == method)
                .cloned()
                .collect()
        })
    }

    pub(crate) fn closed(&self, job: &str) -> u32 {
        self.with_state(|s| s.closed.get(&ObjectPath::new(job)).copied().unwrap_or(0))
    }

    pub(crate) fn state_reads(&self) -> usize {
        self.with_state(|s| s.state_reads)
    }
}

impl Transport for MockTransport {
    fn invoke(
        &self,
        target: &ObjectPath,
        method: &str,
        inputs: &MethodInputs,
    ) -> Result<MethodOutput> {
        self.with_state(|s| {
            s.invocations.push(Invocation {
                target: target.clone(),
                method: method.to_string(),
                inputs: inputs.clone(),
            });
            let response = s
                .responses
                .get_mut(method)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(MockResponse::completed);

            let output = response.outcome.map_err(Error::Transport)?;
            if let Some((path, job)) = response.job {
                s.jobs.insert(path, job);
            }
            if output.return_value == 0 {
                if let Some((entity, state)) = response.effect {
                    s.states.insert(entity, state);
                }
            }
            Ok(output)
        })
    }

    fn poll_job(&self, job: &JobHandle) -> Result<JobStatus> {
        self.with_state(|s| {
            let entry = s
                .jobs
                .get_mut(job.path())
                .ok_or_else(|| Error::Transport(format!("unknown job {}", job)))?;
            let status = if entry.statuses.len() > 1 {
                entry.statuses.pop_front()
            } else {
                entry.statuses.front().copied()
            }
            .unwrap_or_else(JobStatus::completed);

            if status.state.is_completed() {
                if let Some((entity, state)) = entry.effect.take() {
                    s.states.insert(entity, state);
                }
            }
            Ok(status)
        })
    }

    fn job_diagnostics(&self, job: &JobHandle) -> Result<String> {
        self.with_state(|s| {
            s.jobs
                .get(job.path())
                .and_then(|j| j.diagnostics.clone())
                .ok_or_else(|| Error::Transport(format!("no diagnostics for {}", job)))
        })
    }

    fn close_job(&self, job: &JobHandle) -> Result<()> {
        self.with_state(|s| *s.closed.entry(job.path().clone()).or_insert(0) += 1);
        Ok(())
    }

    fn read_state(&self, entity: &ObjectPath) -> Result<VmState> {
        self.with_state(|s| {
            s.state_reads += 1;
            s.states
                .get(entity)
                .copied()
                .ok_or_else(|| Error::Transport(format!("no state for {}", entity)))
        })
    }

    fn read_status(&self, entity: &ObjectPath) -> Result<String> {
        self.with_state(|s| {
            if s.fail_status_reads {
                return Err(Error::Transport("status unavailable".to_string()));
            }
            Ok(s.statuses.get(entity).cloned().unwrap_or_else(|| "OK".to_string()))
        })
    }

    fn read_status_descriptions(&self, entity: &ObjectPath) -> Result<Vec<String>> {
        self.with_state(|s| {
            if s.fail_status_reads {
                return Err(Error::Transport("descriptions unavailable".to_string()));
            }
            Ok(s.descriptions.get(entity).cloned().unwrap_or_default())
        })
    }

    fn query(&self, filter: &str) -> Result<Vec<ObjectPath>> {
        self.with_state(|s| Ok(s.queries.get(filter).cloned().unwrap_or_default()))
    }

    fn fetch(&self, path: &ObjectPath) -> Result<Instance> {
        self.with_state(|s| {
            s.objects
                .get(path)
                .cloned()
                .ok_or_else(|| Error::not_found("Object", path.as_str()))
        })
    }

    fn default_settings(&self, resource_subtype: &str) -> Result<Instance> {
        self.with_state(|s| {
            s.defaults
                .get(resource_subtype)
                .cloned()
                .ok_or_else(|| Error::not_found("Default settings", resource_subtype))
        })
    }
}

/// Configuration with millisecond-scale intervals.
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.polling.interval_ms = 1;
    config.retry.interval_ms = 1;
    config.timeouts.state_change_secs = 2;
    config
}

pub(crate) const SHORT: Duration = Duration::from_millis(20);

/// A host with one VM, its management service, and its settings.
pub(crate) mod fixture {
    use super::MockTransport;
    use crate::query;
    use crate::transport::{Instance, ObjectPath};
    use crate::vm::{Generation, VmState};

    pub(crate) fn service() -> ObjectPath {
        ObjectPath::new("Msvm_VirtualSystemManagementService.Name=\"vmms\"")
    }

    pub(crate) fn vm() -> ObjectPath {
        ObjectPath::new("Msvm_ComputerSystem.Name=\"vm-1\"")
    }

    pub(crate) fn settings() -> ObjectPath {
        ObjectPath::new("Msvm_VirtualSystemSettingData.InstanceID=\"Microsoft:vm-1\"")
    }

    fn snapshot_settings() -> ObjectPath {
        ObjectPath::new("Msvm_VirtualSystemSettingData.InstanceID=\"Microsoft:snap-1\"")
    }

    /// Register the VM, a realized configuration and one snapshot configuration.
    pub(crate) fn host(generation: Generation) -> MockTransport {
        let transport = MockTransport::new();
        transport.on_query(
            &query::singleton(query::VIRTUAL_SYSTEM_MANAGEMENT_SERVICE),
            &[&service()],
        );
        transport.set_state(&vm(), VmState::Off);
        transport.insert(
            Instance::new("Msvm_ComputerSystem")
                .with_path(vm())
                .with("ElementName", "web01")
                .with("Name", "vm-1")
                .with("EnabledState", VmState::Off.value()),
        );
        transport.on_query(
            &query::associators(&vm(), query::VIRTUAL_SYSTEM_SETTING_DATA),
            &[&snapshot_settings(), &settings()],
        );
        transport.insert(
            Instance::new(query::VIRTUAL_SYSTEM_SETTING_DATA)
                .with_path(snapshot_settings())
                .with("VirtualSystemType", "Microsoft:Hyper-V:Snapshot:Realized"),
        );
        transport.insert(
            Instance::new(query::VIRTUAL_SYSTEM_SETTING_DATA)
                .with_path(settings())
                .with("VirtualSystemType", "Microsoft:Hyper-V:System:Realized")
                .with("VirtualSystemSubType", generation.to_subtype()),
        );
        transport
    }
}
