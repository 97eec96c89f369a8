//! Benchmark driver collaborator: runs the load tool and returns one result
//! document per sample. Opaque to the orchestrator, fatal on error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod wrk;

pub use wrk::WrkDriver;

use crate::cluster::ClusterError;
use crate::config::{TestCaseConfig, Termination};
use crate::metadata::ClusterMetadata;
use crate::metrics::MetricsClient;

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("api error: {0}")]
    Api(#[from] kube::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no running client pods to execute the load tool in")]
    NoClientPods,

    #[error("exec in pod {pod} produced no stdout")]
    NoStdout { pod: String },

    #[error("exec in pod {pod} did not finish cleanly")]
    ExecFailed { pod: String },

    #[error("pod {pod} returned malformed output: {source}")]
    Parse {
        pod: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait BenchmarkDriver: Send + Sync {
    async fn run(
        &self,
        cfg: &TestCaseConfig,
        metadata: &ClusterMetadata,
        metrics: Option<&MetricsClient>,
        pod_metrics: bool,
    ) -> Result<Vec<BenchResult>, DriverError>;
}

/// What one client pod reports for one sample: a flat JSON document on
/// stdout. Latencies are in microseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub rps: f64,
    pub avg_lat_us: f64,
    pub max_lat_us: f64,
    pub p90_lat_us: f64,
    pub p95_lat_us: f64,
    pub p99_lat_us: f64,
    #[serde(default)]
    pub requests: u64,
    #[serde(default)]
    pub timeouts: u64,
    #[serde(default)]
    pub read_errors: u64,
    #[serde(default)]
    pub write_errors: u64,
    #[serde(default)]
    pub http_errors: u64,
}

/// One indexable outcome per sample: cluster identity, the test case's
/// parameters and the metrics aggregated across all client pods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchResult {
    pub uuid: String,
    pub sample: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metadata: ClusterMetadata,
    pub tool: String,
    pub termination: Termination,
    pub server_replicas: i32,
    pub concurrency: i32,
    pub procs: i32,
    pub connections: i32,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub pods: usize,
    pub rps: f64,
    pub rps_stdev: f64,
    pub avg_lat_us: f64,
    pub max_lat_us: f64,
    pub p90_lat_us: f64,
    pub p95_lat_us: f64,
    pub p99_lat_us: f64,
    pub requests: u64,
    pub timeouts: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub http_errors: u64,
    pub router_cpu: Option<f64>,
}

/// Fold per-pod samples into one result. Throughput and counters add up
/// across pods; latency averages are means, maxima are maxima.
pub fn aggregate(
    cfg: &TestCaseConfig,
    metadata: &ClusterMetadata,
    sample: u32,
    pods: &[LoadSample],
    router_cpu: Option<f64>,
) -> BenchResult {
    let rps: Vec<f64> = pods.iter().map(|p| p.rps).collect();
    BenchResult {
        uuid: cfg.uuid.clone(),
        sample,
        timestamp: Utc::now(),
        metadata: metadata.clone(),
        tool: cfg.tool.clone(),
        termination: cfg.termination,
        server_replicas: cfg.server_replicas,
        concurrency: cfg.concurrency,
        procs: cfg.procs,
        connections: cfg.connections,
        duration: cfg.duration,
        pods: pods.len(),
        rps: rps.iter().sum(),
        rps_stdev: stdev(&rps),
        avg_lat_us: mean(pods.iter().map(|p| p.avg_lat_us)),
        max_lat_us: max(pods.iter().map(|p| p.max_lat_us)),
        p90_lat_us: mean(pods.iter().map(|p| p.p90_lat_us)),
        p95_lat_us: mean(pods.iter().map(|p| p.p95_lat_us)),
        p99_lat_us: mean(pods.iter().map(|p| p.p99_lat_us)),
        requests: pods.iter().map(|p| p.requests).sum(),
        timeouts: pods.iter().map(|p| p.timeouts).sum(),
        read_errors: pods.iter().map(|p| p.read_errors).sum(),
        write_errors: pods.iter().map(|p| p.write_errors).sum(),
        http_errors: pods.iter().map(|p| p.http_errors).sum(),
        router_cpu,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn max(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(0.0, f64::max)
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case() -> TestCaseConfig {
        serde_yaml::from_str(
            r#"
uuid: run-1
tool: wrk
termination: edge
serverReplicas: 2
concurrency: 2
procs: 1
connections: 100
duration: 30s
"#,
        )
        .unwrap()
    }

    #[test]
    fn throughput_and_counters_add_up_across_pods() {
        let pods = vec![
            LoadSample {
                rps: 1000.0,
                avg_lat_us: 200.0,
                max_lat_us: 900.0,
                requests: 30_000,
                http_errors: 2,
                ..Default::default()
            },
            LoadSample {
                rps: 3000.0,
                avg_lat_us: 400.0,
                max_lat_us: 1500.0,
                requests: 90_000,
                http_errors: 1,
                ..Default::default()
            },
        ];
        let res = aggregate(&case(), &ClusterMetadata::default(), 1, &pods, None);
        assert_eq!(res.rps, 4000.0);
        assert_eq!(res.requests, 120_000);
        assert_eq!(res.http_errors, 3);
        assert_eq!(res.avg_lat_us, 300.0);
        assert_eq!(res.max_lat_us, 1500.0);
        assert_eq!(res.rps_stdev, 1000.0);
        assert_eq!(res.pods, 2);
        assert_eq!(res.uuid, "run-1");
        assert_eq!(res.sample, 1);
    }

    #[test]
    fn single_pod_has_no_spread() {
        let pods = vec![LoadSample {
            rps: 500.0,
            ..Default::default()
        }];
        let res = aggregate(&case(), &ClusterMetadata::default(), 1, &pods, Some(0.4));
        assert_eq!(res.rps_stdev, 0.0);
        assert_eq!(res.router_cpu, Some(0.4));
    }

    #[test]
    fn wire_sample_tolerates_missing_counters() {
        let raw = r#"{"rps": 12000.5, "avg_lat_us": 350.0, "max_lat_us": 8000.0,
                      "p90_lat_us": 500.0, "p95_lat_us": 700.0, "p99_lat_us": 1200.0}"#;
        let sample: LoadSample = serde_json::from_str(raw).unwrap();
        assert_eq!(sample.rps, 12000.5);
        assert_eq!(sample.requests, 0);
    }
}
