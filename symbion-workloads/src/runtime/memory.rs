//! In-memory runtime for tests and development without a container engine
//!
//! Clones share state, so a test keeps one handle to seed workloads, inject
//! failures and inspect recorded calls while the manager owns another.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::{Observers, RuntimeError, WorkloadEvent, WorkloadObserver, WorkloadRuntime};
use crate::models::{WorkloadInfo, WorkloadStatus};
use crate::pod::Pod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOperation {
    Init,
    List,
    Run,
    Start,
    Remove,
    PersistConfiguration,
    RemoveTable,
    RemoveMappingFile,
}

/// One recorded call into the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeCall {
    pub operation: RuntimeOperation,
    pub workload: Option<String>,
    pub manifest_path: Option<PathBuf>,
    pub config_map_paths: Vec<PathBuf>,
}

impl RuntimeCall {
    fn new(operation: RuntimeOperation, workload: Option<&str>) -> Self {
        Self {
            operation,
            workload: workload.map(str::to_string),
            manifest_path: None,
            config_map_paths: Vec::new(),
        }
    }
}

struct Failure {
    operation: RuntimeOperation,
    workload: Option<String>,
}

#[derive(Default)]
struct State {
    workloads: BTreeMap<String, WorkloadInfo>,
    calls: Vec<RuntimeCall>,
    failures: Vec<Failure>,
    observers: Observers,
    persisted: Option<Vec<String>>,
}

impl State {
    /// Consumes a matching injected failure, if any
    fn take_failure(&mut self, operation: RuntimeOperation, workload: Option<&str>) -> Option<RuntimeError> {
        let index = self.failures.iter().position(|f| {
            f.operation == operation && (f.workload.is_none() || f.workload.as_deref() == workload)
        })?;
        self.failures.remove(index);
        Some(RuntimeError::Rejected(format!(
            "injected {:?} failure{}",
            operation,
            workload.map(|w| format!(" for {}", w)).unwrap_or_default()
        )))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRuntime {
    state: Arc<Mutex<State>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a live workload without recording a call
    pub fn with_workload(self, name: &str, status: WorkloadStatus) -> Self {
        self.set_status(name, status);
        self
    }

    pub fn set_status(&self, name: &str, status: WorkloadStatus) {
        let mut state = self.state.lock();
        let entry = state.workloads.entry(name.to_string()).or_insert_with(|| WorkloadInfo {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: WorkloadStatus::Unknown,
        });
        entry.status = status;
    }

    /// Makes the next matching call fail; `None` matches any workload
    pub fn fail_next(&self, operation: RuntimeOperation, workload: Option<&str>) {
        self.state.lock().failures.push(Failure {
            operation,
            workload: workload.map(str::to_string),
        });
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_of(&self, operation: RuntimeOperation) -> Vec<RuntimeCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn count(&self, operation: RuntimeOperation) -> usize {
        self.state.lock().calls.iter().filter(|c| c.operation == operation).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn workload_names(&self) -> Vec<String> {
        self.state.lock().workloads.keys().cloned().collect()
    }

    pub fn status_of(&self, name: &str) -> Option<WorkloadStatus> {
        self.state.lock().workloads.get(name).map(|w| w.status.clone())
    }

    /// Names saved by the last `persist_configuration`
    pub fn persisted(&self) -> Option<Vec<String>> {
        self.state.lock().persisted.clone()
    }

    fn simple_call(&self, operation: RuntimeOperation) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::new(operation, None));
        match state.take_failure(operation, None) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl WorkloadRuntime for InMemoryRuntime {
    fn init(&mut self) -> Result<(), RuntimeError> {
        self.simple_call(RuntimeOperation::Init)
    }

    fn list(&self) -> Result<Vec<WorkloadInfo>, RuntimeError> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::new(RuntimeOperation::List, None));
        if let Some(err) = state.take_failure(RuntimeOperation::List, None) {
            return Err(err);
        }
        Ok(state.workloads.values().cloned().collect())
    }

    fn run(&mut self, pod: &Pod, manifest_path: &Path, config_map_paths: &[PathBuf]) -> Result<(), RuntimeError> {
        let name = pod.name().to_string();
        let observers = {
            let mut state = self.state.lock();
            state.calls.push(RuntimeCall {
                operation: RuntimeOperation::Run,
                workload: Some(name.clone()),
                manifest_path: Some(manifest_path.to_path_buf()),
                config_map_paths: config_map_paths.to_vec(),
            });
            if let Some(err) = state.take_failure(RuntimeOperation::Run, Some(&name)) {
                return Err(err);
            }
            state.workloads.insert(
                name.clone(),
                WorkloadInfo {
                    id: Uuid::new_v4().to_string(),
                    name: name.clone(),
                    status: WorkloadStatus::Running,
                },
            );
            state.observers.clone()
        };
        observers.notify(WorkloadEvent::started(&name));
        Ok(())
    }

    fn start(&mut self, pod: &Pod) -> Result<(), RuntimeError> {
        let name = pod.name().to_string();
        let observers = {
            let mut state = self.state.lock();
            state.calls.push(RuntimeCall::new(RuntimeOperation::Start, Some(&name)));
            if let Some(err) = state.take_failure(RuntimeOperation::Start, Some(&name)) {
                return Err(err);
            }
            let workload = state
                .workloads
                .get_mut(&name)
                .ok_or_else(|| RuntimeError::NotFound(name.clone()))?;
            workload.status = WorkloadStatus::Running;
            state.observers.clone()
        };
        observers.notify(WorkloadEvent::started(&name));
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), RuntimeError> {
        let (removed, observers) = {
            let mut state = self.state.lock();
            state.calls.push(RuntimeCall::new(RuntimeOperation::Remove, Some(name)));
            if let Some(err) = state.take_failure(RuntimeOperation::Remove, Some(name)) {
                return Err(err);
            }
            (state.workloads.remove(name).is_some(), state.observers.clone())
        };
        if removed {
            observers.notify(WorkloadEvent::removed(name));
        }
        Ok(())
    }

    fn register_observer(&mut self, observer: Arc<dyn WorkloadObserver>) {
        self.state.lock().observers.register(observer);
    }

    fn persist_configuration(&mut self) -> Result<(), RuntimeError> {
        self.simple_call(RuntimeOperation::PersistConfiguration)?;
        let mut state = self.state.lock();
        state.persisted = Some(state.workloads.keys().cloned().collect());
        Ok(())
    }

    fn remove_table(&mut self) -> Result<(), RuntimeError> {
        self.simple_call(RuntimeOperation::RemoveTable)
    }

    fn remove_mapping_file(&mut self) -> Result<(), RuntimeError> {
        self.simple_call(RuntimeOperation::RemoveMappingFile)?;
        self.state.lock().persisted = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::ObjectMeta;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_run_then_remove() {
        let mut runtime = InMemoryRuntime::new();
        let handle = runtime.clone();

        runtime.run(&pod("app1"), Path::new("/m/app1.yaml"), &[PathBuf::from("/cm.yaml")]).unwrap();
        assert_eq!(handle.status_of("app1"), Some(WorkloadStatus::Running));
        let run = &handle.calls_of(RuntimeOperation::Run)[0];
        assert_eq!(run.manifest_path.as_deref(), Some(Path::new("/m/app1.yaml")));

        runtime.remove("app1").unwrap();
        runtime.remove("app1").unwrap();
        assert!(handle.workload_names().is_empty());
        assert_eq!(handle.count(RuntimeOperation::Remove), 2);
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let mut runtime = InMemoryRuntime::new();
        runtime.fail_next(RuntimeOperation::Run, Some("app1"));

        assert!(runtime.run(&pod("app2"), Path::new("/m"), &[]).is_ok());
        assert!(runtime.run(&pod("app1"), Path::new("/m"), &[]).is_err());
        assert!(runtime.run(&pod("app1"), Path::new("/m"), &[]).is_ok());
    }

    #[test]
    fn test_start_unknown_workload_fails() {
        let mut runtime = InMemoryRuntime::new().with_workload("app1", WorkloadStatus::Exited);
        assert!(matches!(runtime.start(&pod("ghost")), Err(RuntimeError::NotFound(_))));
        runtime.start(&pod("app1")).unwrap();
        assert_eq!(runtime.status_of("app1"), Some(WorkloadStatus::Running));
    }
}
