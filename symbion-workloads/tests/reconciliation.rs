//! End-to-end reconciliation behavior against the in-memory runtime

use std::fs::OpenOptions;
use std::path::Path;
use std::time::{Duration, SystemTime};

use symbion_workloads::runtime::RuntimeOperation;
use symbion_workloads::{
    InMemoryRuntime, ManagerSettings, WorkloadConfiguration, WorkloadManager, WorkloadSpec, WorkloadStatus,
};
use tempfile::TempDir;

const ONE_CONTAINER: &str = "containers:\n  - name: web\n    image: docker.io/library/nginx:1.25\n    ports:\n      - containerPort: 80\n";

fn settings(tmp: &TempDir) -> ManagerSettings {
    ManagerSettings::new(tmp.path(), "device-config", tmp.path().join("device-config.yaml"))
}

fn start(tmp: &TempDir, runtime: &InMemoryRuntime) -> WorkloadManager<InMemoryRuntime> {
    WorkloadManager::new(&settings(tmp), runtime.clone()).unwrap()
}

fn workload(name: &str, specification: &str) -> WorkloadSpec {
    WorkloadSpec {
        name: name.to_string(),
        specification: specification.to_string(),
    }
}

fn config(workloads: Vec<WorkloadSpec>) -> WorkloadConfiguration {
    WorkloadConfiguration {
        workloads,
        monitoring_interval_seconds: 0,
    }
}

fn manifest(tmp: &TempDir, name: &str) -> std::path::PathBuf {
    tmp.path().join("manifests").join(format!("{}.yaml", name))
}

#[tokio::test]
async fn test_first_update_creates_manifest_and_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);

    manager.update(&config(vec![workload("app1", ONE_CONTAINER)])).unwrap();

    assert!(manifest(&tmp, "app1").is_file());
    let runs = runtime.calls_of(RuntimeOperation::Run);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].workload.as_deref(), Some("app1"));
    assert_eq!(runs[0].manifest_path.as_deref(), Some(manifest(&tmp, "app1").as_path()));
    assert_eq!(runs[0].config_map_paths, vec![tmp.path().join("device-config.yaml")]);

    let stored = std::fs::read_to_string(manifest(&tmp, "app1")).unwrap();
    assert!(stored.contains("kind: Pod"));
    assert!(stored.contains("name: app1"));
    assert!(stored.contains("mountPath: /export"));
    assert!(stored.contains("containerPort: 80"));
}

#[tokio::test]
async fn test_empty_update_removes_workload_and_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);
    manager.update(&config(vec![workload("app1", ONE_CONTAINER)])).unwrap();
    runtime.clear_calls();

    manager.update(&config(vec![])).unwrap();

    assert!(!manifest(&tmp, "app1").exists());
    let removes = runtime.calls_of(RuntimeOperation::Remove);
    assert_eq!(removes.len(), 1);
    assert_eq!(removes[0].workload.as_deref(), Some("app1"));
    assert!(runtime.workload_names().is_empty());
}

#[tokio::test]
async fn test_unchanged_update_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);
    let desired = config(vec![workload("app1", ONE_CONTAINER), workload("app2", ONE_CONTAINER)]);

    manager.update(&desired).unwrap();
    let before = std::fs::read(manifest(&tmp, "app1")).unwrap();
    // backdate the manifest so any rewrite shows up in its mtime
    let backdated = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    OpenOptions::new()
        .write(true)
        .open(manifest(&tmp, "app1"))
        .unwrap()
        .set_modified(backdated)
        .unwrap();
    runtime.clear_calls();

    manager.update(&desired).unwrap();
    assert_eq!(runtime.count(RuntimeOperation::Run), 0);
    assert_eq!(runtime.count(RuntimeOperation::Remove), 0);
    assert_eq!(std::fs::read(manifest(&tmp, "app1")).unwrap(), before);
    let modified = std::fs::metadata(manifest(&tmp, "app1")).unwrap().modified().unwrap();
    assert_eq!(modified, backdated);
}

#[tokio::test]
async fn test_unconfigured_live_workload_is_collected() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new().with_workload("legacy", WorkloadStatus::Running);
    let manager = start(&tmp, &runtime);
    std::fs::write(manifest(&tmp, "legacy"), "kind: Pod\n").unwrap();

    manager.update(&config(vec![workload("app1", ONE_CONTAINER)])).unwrap();

    assert_eq!(runtime.workload_names(), vec!["app1".to_string()]);
    assert!(!manifest(&tmp, "legacy").exists());
}

#[tokio::test]
async fn test_dropped_workload_that_never_ran_is_not_revived() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);
    runtime.fail_next(RuntimeOperation::Run, Some("app1"));
    assert!(manager.update(&config(vec![workload("app1", ONE_CONTAINER)])).is_err());
    assert!(manifest(&tmp, "app1").is_file());

    manager.update(&config(vec![])).unwrap();
    assert!(!manifest(&tmp, "app1").exists());

    manager.reconcile_from_manifests().unwrap();
    assert!(runtime.workload_names().is_empty());
    assert_eq!(runtime.count(RuntimeOperation::Run), 1);
}

#[tokio::test]
async fn test_every_stale_workload_is_attempted() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new()
        .with_workload("old1", WorkloadStatus::Running)
        .with_workload("old2", WorkloadStatus::Exited)
        .with_workload("old3", WorkloadStatus::Running);
    let manager = start(&tmp, &runtime);
    runtime.fail_next(RuntimeOperation::Remove, Some("old2"));

    let err = manager.update(&config(vec![workload("app1", ONE_CONTAINER)])).unwrap_err();

    assert_eq!(err.len(), 1);
    assert!(err.to_string().contains("old2"));
    assert_eq!(runtime.workload_names(), vec!["app1".to_string(), "old2".to_string()]);
}

#[tokio::test]
async fn test_manifest_delete_failure_is_reported_and_workload_still_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new().with_workload("legacy", WorkloadStatus::Running);
    let manager = start(&tmp, &runtime);
    // a directory where the manifest should be cannot be removed as a file
    let blocker = manifest(&tmp, "legacy");
    std::fs::create_dir(&blocker).unwrap();
    std::fs::write(blocker.join("keep"), "x").unwrap();

    let err = manager.update(&config(vec![])).unwrap_err();

    assert_eq!(err.len(), 1);
    assert!(err.to_string().contains("cannot remove manifest of stale workload 'legacy'"));
    assert!(runtime.workload_names().is_empty());
}

#[tokio::test]
async fn test_stopped_workload_is_started_not_rerun() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);
    manager.update(&config(vec![workload("app1", ONE_CONTAINER)])).unwrap();
    runtime.set_status("app1", WorkloadStatus::Exited);
    runtime.clear_calls();

    manager.reconcile_from_manifests().unwrap();

    let starts = runtime.calls_of(RuntimeOperation::Start);
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].workload.as_deref(), Some("app1"));
    assert_eq!(runtime.count(RuntimeOperation::Run), 0);
    assert_eq!(runtime.status_of("app1"), Some(WorkloadStatus::Running));
}

#[tokio::test]
async fn test_malformed_workload_does_not_block_others() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);

    let err = manager
        .update(&config(vec![
            workload("broken", "containers: [name: "),
            workload("healthy", ONE_CONTAINER),
        ]))
        .unwrap_err();

    assert_eq!(err.len(), 1);
    assert!(err.to_string().contains("broken"));
    assert!(err.to_string().starts_with("1 error occurred:"));
    assert_eq!(runtime.workload_names(), vec!["healthy".to_string()]);
    assert!(!manifest(&tmp, "broken").exists());
}

#[tokio::test]
async fn test_update_after_deregister_does_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);
    manager.update(&config(vec![workload("app1", ONE_CONTAINER)])).unwrap();

    manager.deregister().unwrap();
    assert!(!tmp.path().join("manifests").exists());
    assert!(!tmp.path().join("volumes").exists());
    runtime.clear_calls();

    manager.update(&config(vec![workload("app2", ONE_CONTAINER)])).unwrap();
    assert!(runtime.calls().is_empty());
    assert!(!tmp.path().join("manifests").exists());
}

#[tokio::test]
async fn test_transient_run_failure_converges_after_tick() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);
    runtime.fail_next(RuntimeOperation::Run, Some("app2"));

    let mut desired = config(vec![workload("app1", ONE_CONTAINER), workload("app2", ONE_CONTAINER)]);
    desired.monitoring_interval_seconds = 1;
    let err = manager.update(&desired).unwrap_err();
    assert!(err.to_string().contains("app2"));
    assert!(manifest(&tmp, "app2").is_file());
    assert_eq!(manager.monitoring_interval(), Duration::from_secs(1));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while runtime.workload_names().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(runtime.workload_names(), vec!["app1".to_string(), "app2".to_string()]);
}

#[tokio::test]
async fn test_zero_interval_keeps_current_period() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = InMemoryRuntime::new();
    let manager = start(&tmp, &runtime);

    let mut desired = config(vec![]);
    desired.monitoring_interval_seconds = 30;
    manager.update(&desired).unwrap();
    assert_eq!(manager.monitoring_interval(), Duration::from_secs(30));

    desired.monitoring_interval_seconds = 0;
    manager.update(&desired).unwrap();
    assert_eq!(manager.monitoring_interval(), Duration::from_secs(30));
}

#[tokio::test]
async fn test_restart_recovers_from_manifests() {
    let tmp = tempfile::tempdir().unwrap();
    let first = InMemoryRuntime::new();
    let manager = start(&tmp, &first);
    manager.update(&config(vec![workload("app one", ONE_CONTAINER)])).unwrap();
    assert!(Path::new(&manifest(&tmp, "app-one")).is_file());
    drop(manager);

    // fresh runtime, same data directory
    let second = InMemoryRuntime::new();
    let manager = start(&tmp, &second);
    manager.reconcile_from_manifests().unwrap();
    assert_eq!(second.workload_names(), vec!["app one".to_string()]);
    assert_eq!(
        second.persisted(),
        Some(vec!["app one".to_string()])
    );
    let workloads = manager.list_workloads().unwrap();
    assert_eq!(workloads.len(), 1);
    assert_eq!(workloads[0].status, WorkloadStatus::Running);
}
