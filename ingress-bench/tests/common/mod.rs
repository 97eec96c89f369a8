#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::core::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use ingress_bench::cluster::{
    ClusterError, ClusterOps, ContainerWait, Created, DeploymentSnapshot, PendingPod,
};
use ingress_bench::config::{RunnerConfig, TestCaseConfig, Termination};
use ingress_bench::driver::{aggregate, BenchResult, BenchmarkDriver, DriverError, LoadSample};
use ingress_bench::metadata::ClusterMetadata;
use ingress_bench::metrics::MetricsClient;
use ingress_bench::runner::{Comparator, Session};
use ingress_bench::sink::{Indexer, IndexingOpts, SinkError};
use ingress_bench::tuning::{TuningApplier, TuningError};

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub fn snap(desired: i32, current: i32, ready: i32, available: i32) -> DeploymentSnapshot {
    DeploymentSnapshot {
        desired,
        current,
        ready,
        available,
        updated: ready,
        selector: BTreeMap::from([("app".to_string(), "fake".to_string())]),
    }
}

/// Scripted in-memory [`ClusterOps`]. Deployment snapshots are queued per
/// deployment name; the last queued snapshot repeats forever. Every call is
/// recorded as one line, so tests assert on exact call sequences.
#[derive(Default)]
pub struct FakeCluster {
    calls: Mutex<Vec<String>>,
    snapshots: Mutex<HashMap<String, VecDeque<DeploymentSnapshot>>>,
    pending: Mutex<Vec<PendingPod>>,
    pub namespace_already_exists: bool,
    pub objects_already_exist: bool,
    namespace_polls_until_gone: Mutex<u32>,
    fail_snapshots: Mutex<bool>,
    fail_delete: Mutex<Option<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: String) -> Result<(), ClusterError> {
        if self
            .fail_delete
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|f| call == f)
        {
            return Err(ClusterError::Missing(format!("injected failure: {call}")));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn push_snapshots(&self, name: &str, snaps: Vec<DeploymentSnapshot>) {
        self.snapshots
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(snaps);
    }

    /// Pin a deployment at the given scale, every counter agreeing.
    pub fn set_ready(&self, name: &str, replicas: i32) {
        self.push_snapshots(name, vec![snap(replicas, replicas, replicas, replicas)]);
    }

    pub fn set_pending_pods(&self, pods: Vec<PendingPod>) {
        *self.pending.lock().unwrap() = pods;
    }

    pub fn fail_snapshots(&self) {
        *self.fail_snapshots.lock().unwrap() = true;
    }

    pub fn fail_delete_of(&self, call: &str) {
        *self.fail_delete.lock().unwrap() = Some(call.to_string());
    }

    /// Number of existence probes that still see the namespace before the
    /// deletion is observed as complete.
    pub fn namespace_gone_after(&self, polls: u32) {
        *self.namespace_polls_until_gone.lock().unwrap() = polls;
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn create_namespace(&self, ns: &Namespace) -> Result<Created, ClusterError> {
        self.record(format!("create namespace {}", ns.name_any()))?;
        if self.namespace_already_exists {
            return Ok(Created::AlreadyExists);
        }
        Ok(Created::New)
    }

    async fn create_deployment(
        &self,
        _ns: &str,
        deployment: &Deployment,
    ) -> Result<Created, ClusterError> {
        self.record(format!("create deployment {}", deployment.name_any()))?;
        if self.objects_already_exist {
            return Ok(Created::AlreadyExists);
        }
        Ok(Created::New)
    }

    async fn create_service(&self, _ns: &str, service: &Service) -> Result<Created, ClusterError> {
        self.record(format!("create service {}", service.name_any()))?;
        Ok(Created::New)
    }

    async fn create_route(
        &self,
        _ns: &str,
        route: &DynamicObject,
    ) -> Result<Created, ClusterError> {
        self.record(format!("create route {}", route.name_any()))?;
        Ok(Created::New)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<Created, ClusterError> {
        self.record(format!("create crb {}", binding.name_any()))?;
        Ok(Created::New)
    }

    async fn deployment_snapshot(
        &self,
        _ns: &str,
        name: &str,
    ) -> Result<DeploymentSnapshot, ClusterError> {
        if *self.fail_snapshots.lock().unwrap() {
            return Err(ClusterError::Missing("injected snapshot failure".into()));
        }
        self.record(format!("snapshot {name}"))?;
        let mut snapshots = self.snapshots.lock().unwrap();
        let queue = snapshots
            .get_mut(name)
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| ClusterError::NotFound(name.to_string()))
        }
    }

    async fn scale_deployment(
        &self,
        _ns: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        self.record(format!("scale {name} {replicas}"))
    }

    async fn pending_pods(
        &self,
        _ns: &str,
        _selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PendingPod>, ClusterError> {
        self.record("list pending pods".to_string())?;
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn route_host(&self, _ns: &str, name: &str) -> Result<String, ClusterError> {
        self.record(format!("route host {name}"))?;
        Ok(format!("{name}.apps.example.com"))
    }

    async fn delete_deployment(&self, _ns: &str, name: &str) -> Result<(), ClusterError> {
        self.record(format!("delete deployment {name}"))
    }

    async fn delete_service(&self, _ns: &str, name: &str) -> Result<(), ClusterError> {
        self.record(format!("delete service {name}"))
    }

    async fn delete_route(&self, _ns: &str, name: &str) -> Result<(), ClusterError> {
        self.record(format!("delete route {name}"))
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), ClusterError> {
        self.record(format!("delete crb {name}"))
    }

    async fn delete_namespace(&self, ns: &str) -> Result<(), ClusterError> {
        self.record(format!("delete namespace {ns}"))
    }

    async fn namespace_exists(&self, _ns: &str) -> Result<bool, ClusterError> {
        self.record("get namespace".to_string())?;
        let mut left = self.namespace_polls_until_gone.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Ok(true);
        }
        Ok(false)
    }
}

pub fn pending_pod(name: &str, reason: &str) -> PendingPod {
    PendingPod {
        name: name.to_string(),
        node: None,
        waiting: vec![ContainerWait {
            container: "client".to_string(),
            reason: reason.to_string(),
            message: Some(format!("{reason} while pulling image")),
        }],
    }
}

#[derive(Clone, Debug)]
pub struct IndexCall {
    pub docs: Vec<Value>,
    pub batch_label: Option<String>,
}

/// Records every flush instead of shipping it anywhere.
#[derive(Clone, Default)]
pub struct RecordingIndexer {
    pub calls: Arc<Mutex<Vec<IndexCall>>>,
}

impl RecordingIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn index(&self, documents: &[Value], opts: &IndexingOpts) -> Result<String, SinkError> {
        self.calls.lock().unwrap().push(IndexCall {
            docs: documents.to_vec(),
            batch_label: opts.batch_label.clone(),
        });
        Ok(format!("recorded {} documents", documents.len()))
    }
}

/// Produces a fixed number of results per case; optionally fails on the
/// n-th invocation (1-based).
pub struct FakeDriver {
    results_per_case: u32,
    fail_on_call: Option<usize>,
    calls: Mutex<usize>,
    pub seen: Mutex<Vec<TestCaseConfig>>,
}

impl FakeDriver {
    pub fn new(results_per_case: u32) -> Self {
        Self {
            results_per_case,
            fail_on_call: None,
            calls: Mutex::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(results_per_case: u32, call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::new(results_per_case)
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl BenchmarkDriver for FakeDriver {
    async fn run(
        &self,
        cfg: &TestCaseConfig,
        metadata: &ClusterMetadata,
        _metrics: Option<&MetricsClient>,
        _pod_metrics: bool,
    ) -> Result<Vec<BenchResult>, DriverError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if self.fail_on_call == Some(call) {
            return Err(DriverError::NoClientPods);
        }
        self.seen.lock().unwrap().push(cfg.clone());
        Ok((1..=self.results_per_case)
            .map(|sample| {
                aggregate(
                    cfg,
                    metadata,
                    sample,
                    &[LoadSample {
                        rps: 1000.0,
                        ..Default::default()
                    }],
                    None,
                )
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeTuner {
    pub applied: Mutex<Vec<String>>,
}

impl FakeTuner {
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl TuningApplier for FakeTuner {
    async fn apply(&self, profile: &str) -> Result<(), TuningError> {
        self.applied.lock().unwrap().push(profile.to_string());
        Ok(())
    }
}

pub struct FailingComparator;

impl Comparator for FailingComparator {
    fn passes(&self, _cfg: &TestCaseConfig, _results: &[BenchResult]) -> bool {
        false
    }
}

pub fn session(ops: Arc<FakeCluster>) -> Session {
    Session {
        ops,
        metadata: ClusterMetadata::default(),
        metrics: None,
    }
}

pub fn case(server_replicas: i32, concurrency: i32) -> TestCaseConfig {
    TestCaseConfig {
        uuid: String::new(),
        tool: "wrk".to_string(),
        termination: Termination::Edge,
        server_replicas,
        concurrency,
        procs: 1,
        connections: 10,
        samples: 1,
        duration: Duration::from_secs(5),
        delay: Duration::ZERO,
        request_timeout: Duration::from_secs(1),
        tuning: None,
        warmup: false,
    }
}

pub fn runner_config(ns: &str) -> RunnerConfig {
    RunnerConfig {
        namespace: ns.to_string(),
        uuid: Some(uniq("run")),
        test_case_path: "config.yml".to_string(),
        cleanup: false,
        pod_metrics: false,
        es_server: None,
        es_index: "ingress-bench".to_string(),
        results_dir: None,
        ready_timeout_secs: 5,
        cleanup_timeout_secs: 5,
    }
}
