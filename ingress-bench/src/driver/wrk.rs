use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, ListParams};
use kube::{Client, ResourceExt};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::cluster::ClusterOps;
use crate::config::TestCaseConfig;
use crate::metadata::ClusterMetadata;
use crate::metrics::MetricsClient;
use crate::templates;

use super::{aggregate, BenchResult, BenchmarkDriver, DriverError, LoadSample};

/// Router CPU usage in cores, sampled when pod metrics are requested.
const ROUTER_CPU_QUERY: &str =
    "sum(rate(container_cpu_usage_seconds_total{namespace=\"openshift-ingress\",container!=\"\"}[1m]))";

/// Runs the load tool inside every running client pod concurrently, one exec
/// per pod per sample. Each pod prints a single JSON [`LoadSample`] on
/// stdout; per-pod outputs fold into one [`BenchResult`] per sample.
pub struct WrkDriver {
    client: Client,
    ops: Arc<dyn ClusterOps>,
    ns: String,
}

impl WrkDriver {
    pub fn new(client: Client, ops: Arc<dyn ClusterOps>, ns: impl Into<String>) -> Self {
        Self {
            client,
            ops,
            ns: ns.into(),
        }
    }

    async fn client_pods(&self) -> Result<Vec<String>, DriverError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.ns);
        let lp = ListParams::default()
            .labels(&format!("app={}", templates::CLIENT_NAME))
            .fields("status.phase=Running");
        let pods = api.list(&lp).await?;
        let names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
        if names.is_empty() {
            return Err(DriverError::NoClientPods);
        }
        Ok(names)
    }

    async fn exec_sample(&self, pod: &str, command: &[String]) -> Result<LoadSample, DriverError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.ns);
        let ap = AttachParams::default().stderr(false);
        let mut process = api.exec(pod, command.iter().map(String::as_str), &ap).await?;
        let mut stdout = process.stdout().ok_or_else(|| DriverError::NoStdout {
            pod: pod.to_string(),
        })?;
        let mut out = String::new();
        stdout.read_to_string(&mut out).await?;
        let status = process.take_status();
        process.join().await.map_err(|_| DriverError::ExecFailed {
            pod: pod.to_string(),
        })?;
        if let Some(status) = status {
            if let Some(s) = status.await {
                if s.status.as_deref() == Some("Failure") {
                    return Err(DriverError::ExecFailed {
                        pod: pod.to_string(),
                    });
                }
            }
        }
        serde_json::from_str(out.trim()).map_err(|source| DriverError::Parse {
            pod: pod.to_string(),
            source,
        })
    }

    async fn router_cpu(
        &self,
        metrics: Option<&MetricsClient>,
        pod_metrics: bool,
    ) -> Option<f64> {
        if !pod_metrics {
            return None;
        }
        metrics?.query_instant(ROUTER_CPU_QUERY).await.ok()
    }
}

/// The client image's tool wrapper contract: flags in, one JSON document out.
fn load_command(cfg: &TestCaseConfig, url: &str) -> Vec<String> {
    vec![
        cfg.tool.clone(),
        "-c".to_string(),
        cfg.connections.to_string(),
        "-t".to_string(),
        cfg.procs.to_string(),
        "-d".to_string(),
        format!("{}s", cfg.duration.as_secs()),
        "--timeout".to_string(),
        format!("{}s", cfg.request_timeout.as_secs()),
        "--json".to_string(),
        url.to_string(),
    ]
}

#[async_trait]
impl BenchmarkDriver for WrkDriver {
    #[tracing::instrument(skip_all, fields(tool = %cfg.tool, termination = %cfg.termination))]
    async fn run(
        &self,
        cfg: &TestCaseConfig,
        metadata: &ClusterMetadata,
        metrics: Option<&MetricsClient>,
        pod_metrics: bool,
    ) -> Result<Vec<BenchResult>, DriverError> {
        let route = templates::route_name(cfg.termination);
        let host = self.ops.route_host(&self.ns, &route).await?;
        let url = format!("{}://{}", cfg.termination.scheme(), host);
        let pods = self.client_pods().await?;
        let command = load_command(cfg, &url);
        info!(%url, pods = pods.len(), samples = cfg.samples, "driving load");
        let mut results = Vec::with_capacity(cfg.samples as usize);
        for sample in 1..=cfg.samples {
            let outputs =
                try_join_all(pods.iter().map(|p| self.exec_sample(p, &command))).await?;
            let router_cpu = self.router_cpu(metrics, pod_metrics).await;
            let result = aggregate(cfg, metadata, sample, &outputs, router_cpu);
            debug!(sample, rps = result.rps, "sample complete");
            results.push(result);
            if cfg.delay > Duration::ZERO && sample < cfg.samples {
                tokio::time::sleep(cfg.delay).await;
            }
        }
        Ok(results)
    }
}
