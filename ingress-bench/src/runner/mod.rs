//! Run lifecycle: connect, deploy, sequence test cases, index, tear down.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod cleanup;
mod reconcile;

pub use cleanup::{teardown, TeardownError};
pub use reconcile::{
    assess, wait_ready, Readiness, ReconcileError, Reconciler, WaitError, POLL_INTERVAL,
};

use crate::cluster::{ClusterError, ClusterOps, Created, KubeCluster};
use crate::config::{RunnerConfig, TestCaseConfig};
use crate::driver::{BenchResult, BenchmarkDriver, DriverError};
use crate::metadata::ClusterMetadata;
use crate::metrics::MetricsClient;
use crate::sink::ResultSink;
use crate::templates;
use crate::tuning::{TuningApplier, TuningError};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("cluster connectivity: {0}")]
    Connect(#[source] ClusterError),

    #[error("failed to deploy benchmark assets: {0}")]
    Deploy(#[source] ClusterError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("failed to apply tuning profile: {0}")]
    Tuning(#[from] TuningError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error("{failed} benchmark comparison(s) failed")]
    ComparisonsFailed { failed: usize },
}

/// Everything built once at connect time and threaded into the run: the
/// cluster handle, the captured cluster identity and an optional metrics
/// query handle for the driver.
pub struct Session {
    pub ops: Arc<dyn ClusterOps>,
    pub metadata: ClusterMetadata,
    pub metrics: Option<MetricsClient>,
}

impl Session {
    pub async fn connect(client: Client) -> Result<Self, RunError> {
        let metadata = ClusterMetadata::capture(&client)
            .await
            .map_err(RunError::Connect)?;
        info!(
            k8s = %metadata.k8s_version,
            nodes = metadata.total_nodes,
            "connected to cluster"
        );
        Ok(Self {
            ops: Arc::new(KubeCluster::new(client)),
            metadata,
            metrics: MetricsClient::from_env(),
        })
    }
}

/// Pass/fail gate over one test case's results. Failures are collected and
/// surfaced after the whole sequence ran; they never abort it.
pub trait Comparator: Send + Sync {
    fn passes(&self, cfg: &TestCaseConfig, results: &[BenchResult]) -> bool;
}

/// Sequences the test cases against the cluster. All mutable run state
/// (whether the namespace pre-existed, which tuning profile is live) is
/// scoped here, to one run.
pub struct Runner {
    ns: String,
    run_uuid: String,
    cleanup: bool,
    pod_metrics: bool,
    ready_timeout: Duration,
    cleanup_timeout: Duration,
    cancel: CancellationToken,
    existing_namespace: bool,
    current_tuning: Option<String>,
}

impl Runner {
    pub fn new(cfg: &RunnerConfig) -> Self {
        Self {
            ns: cfg.namespace.clone(),
            run_uuid: cfg.run_uuid(),
            cleanup: cfg.cleanup,
            pod_metrics: cfg.pod_metrics,
            ready_timeout: cfg.ready_timeout(),
            cleanup_timeout: cfg.cleanup_timeout(),
            cancel: CancellationToken::new(),
            existing_namespace: false,
            current_tuning: None,
        }
    }

    pub fn run_uuid(&self) -> &str {
        &self.run_uuid
    }

    /// Token cancelling every in-flight poll of this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create the benchmark's resource set. A namespace that already exists
    /// is adopted, not an error, and is remembered so teardown leaves it in
    /// place. Existing copies of the remaining objects are tolerated to
    /// support redeploying over a previous run.
    pub async fn deploy_assets(&mut self, ops: &dyn ClusterOps) -> Result<(), RunError> {
        info!(ns = %self.ns, "deploying benchmark assets");
        if ops
            .create_namespace(&templates::namespace(&self.ns))
            .await
            .map_err(RunError::Deploy)?
            == Created::AlreadyExists
        {
            debug!(ns = %self.ns, "namespace already exists, adopting it");
            self.existing_namespace = true;
        }
        ops.create_deployment(&self.ns, &templates::server_deployment(&self.ns))
            .await
            .map_err(RunError::Deploy)?;
        ops.create_cluster_role_binding(&templates::client_crb(&self.ns))
            .await
            .map_err(RunError::Deploy)?;
        ops.create_deployment(&self.ns, &templates::client_deployment(&self.ns))
            .await
            .map_err(RunError::Deploy)?;
        ops.create_service(&self.ns, &templates::service(&self.ns))
            .await
            .map_err(RunError::Deploy)?;
        for route in templates::routes(&self.ns) {
            ops.create_route(&self.ns, &route)
                .await
                .map_err(RunError::Deploy)?;
        }
        Ok(())
    }

    /// Execute the full sequence: deploy, then per case reconcile, tune,
    /// drive load and hand results to the sink; finally flush, and tear down
    /// when configured. Comparison failures are reported only after every
    /// case ran and was indexed.
    pub async fn run(
        &mut self,
        session: &Session,
        driver: &dyn BenchmarkDriver,
        tuner: &dyn TuningApplier,
        comparator: Option<&dyn Comparator>,
        mut sink: Option<ResultSink>,
        cases: Vec<TestCaseConfig>,
    ) -> Result<(), RunError> {
        let ops = session.ops.as_ref();
        self.deploy_assets(ops).await?;
        let total = cases.len();
        let mut failed_comparisons = 0usize;
        for (i, mut case) in cases.into_iter().enumerate() {
            case.uuid = self.run_uuid.clone();
            info!(
                case = i + 1,
                total,
                tool = %case.tool,
                termination = %case.termination,
                servers = case.server_replicas,
                concurrency = case.concurrency,
                procs = case.procs,
                connections = case.connections,
                duration = ?case.duration,
                warmup = case.warmup,
                "running test case"
            );
            let reconciler = Reconciler {
                ops,
                ns: &self.ns,
                ready_timeout: self.ready_timeout,
                cancel: &self.cancel,
            };
            if let Err(e) = reconciler.converge(case.server_replicas, case.concurrency).await {
                log_wait_diagnostics(&e);
                return Err(e.into());
            }
            if let Some(profile) = case.tuning.as_deref() {
                if self.current_tuning.as_deref() != Some(profile) {
                    tuner.apply(profile).await?;
                    self.current_tuning = Some(profile.to_string());
                }
            }
            let results = driver
                .run(&case, &session.metadata, session.metrics.as_ref(), self.pod_metrics)
                .await?;
            if let Some(comparator) = comparator {
                if !comparator.passes(&case, &results) {
                    warn!(case = i + 1, "benchmark comparison failed");
                    failed_comparisons += 1;
                }
            }
            if !case.warmup {
                if let Some(sink) = sink.as_mut() {
                    sink.accept(&results).await;
                }
            }
        }
        if let Some(sink) = sink.as_mut() {
            sink.finish(&self.run_uuid).await;
        }
        if self.cleanup {
            teardown(
                ops,
                &self.ns,
                self.existing_namespace,
                self.cleanup_timeout,
                &self.cancel,
            )
            .await?;
        }
        if failed_comparisons > 0 {
            return Err(RunError::ComparisonsFailed {
                failed: failed_comparisons,
            });
        }
        Ok(())
    }
}

/// The readiness diagnostic is reported before the failure propagates, so
/// capacity or image-pull problems are visible without re-querying a cluster
/// that may be mid-teardown by then.
fn log_wait_diagnostics(err: &ReconcileError) {
    let ReconcileError::Wait(WaitError::TimedOut { diagnostics, .. }) = err else {
        return;
    };
    for pod in diagnostics {
        for wait in &pod.waiting {
            error!(
                pod = %pod.name,
                node = pod.node.as_deref().unwrap_or("unscheduled"),
                reason = %wait.reason,
                "pod stuck pending: {}",
                wait.message.as_deref().unwrap_or("")
            );
        }
    }
}
