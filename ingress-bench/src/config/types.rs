use std::fmt;
use std::path::Path;
use std::time::Duration;

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read test case file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse test case file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("test case file contains no test cases")]
    Empty,

    #[error("invalid namespace {0:?}: must be a DNS-1123 subdomain")]
    InvalidNamespace(String),
}

/// Runner-level settings, all sourced from the environment.
/// Test cases themselves arrive separately, see [`load_test_cases`].
#[derive(Envconfig, Clone, Debug)]
pub struct RunnerConfig {
    #[envconfig(from = "INGRESS_BENCH_NAMESPACE", default = "ingress-bench")]
    pub namespace: String,

    /// Run identifier shared by every test case and result document.
    /// Generated when absent.
    #[envconfig(from = "INGRESS_BENCH_UUID")]
    pub uuid: Option<String>,

    #[envconfig(from = "INGRESS_BENCH_CONFIG", default = "config.yml")]
    pub test_case_path: String,

    #[envconfig(from = "INGRESS_BENCH_CLEANUP", default = "true")]
    pub cleanup: bool,

    #[envconfig(from = "INGRESS_BENCH_POD_METRICS", default = "false")]
    pub pod_metrics: bool,

    /// Remote indexing endpoint. When set, results stream per test case.
    #[envconfig(from = "INGRESS_BENCH_ES_SERVER")]
    pub es_server: Option<String>,

    #[envconfig(from = "INGRESS_BENCH_ES_INDEX", default = "ingress-bench")]
    pub es_index: String,

    /// Local results directory. When set (and no remote endpoint), results
    /// are written once per run, keyed by the run identifier.
    #[envconfig(from = "INGRESS_BENCH_RESULTS_DIR")]
    pub results_dir: Option<String>,

    #[envconfig(from = "INGRESS_BENCH_READY_TIMEOUT_SECS", default = "60")]
    pub ready_timeout_secs: u64,

    #[envconfig(from = "INGRESS_BENCH_CLEANUP_TIMEOUT_SECS", default = "600")]
    pub cleanup_timeout_secs: u64,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_dns1123_subdomain(&self.namespace) {
            return Err(ConfigError::InvalidNamespace(self.namespace.clone()));
        }
        Ok(())
    }

    pub fn run_uuid(&self) -> String {
        self.uuid
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}

/// One benchmark run's parameters. Produced by the config loader and
/// consumed read-only; the run identifier is stamped by the sequencer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TestCaseConfig {
    #[serde(default)]
    pub uuid: String,

    pub tool: String,

    pub termination: Termination,

    #[serde(rename = "serverReplicas")]
    pub server_replicas: i32,

    /// Client concurrency, mapped 1:1 to client deployment replicas.
    pub concurrency: i32,

    pub procs: i32,

    pub connections: i32,

    #[serde(default = "default_samples")]
    pub samples: u32,

    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Settle delay between samples.
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,

    #[serde(
        rename = "requestTimeout",
        default = "default_request_timeout",
        with = "humantime_serde"
    )]
    pub request_timeout: Duration,

    #[serde(default)]
    pub tuning: Option<String>,

    #[serde(default)]
    pub warmup: bool,
}

fn default_samples() -> u32 {
    1
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Route termination variant of a test case. Each variant maps to its own
/// pre-created route and backend port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    Http,
    Edge,
    Passthrough,
    Reencrypt,
}

impl Termination {
    pub const ALL: [Termination; 4] = [
        Termination::Http,
        Termination::Edge,
        Termination::Passthrough,
        Termination::Reencrypt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Http => "http",
            Termination::Edge => "edge",
            Termination::Passthrough => "passthrough",
            Termination::Reencrypt => "reencrypt",
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Termination::Http => "http",
            _ => "https",
        }
    }

    /// Backend service port the route targets. Plaintext terminations hit
    /// the clear-text listener, TLS ones the TLS listener.
    pub fn target_port(&self) -> i32 {
        match self {
            Termination::Http | Termination::Edge => 8080,
            Termination::Passthrough | Termination::Reencrypt => 8443,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load the ordered test case sequence from a YAML file.
pub fn load_test_cases(path: impl AsRef<Path>) -> Result<Vec<TestCaseConfig>, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let cases: Vec<TestCaseConfig> = serde_yaml::from_str(&raw)?;
    if cases.is_empty() {
        return Err(ConfigError::Empty);
    }
    Ok(cases)
}

/// RFC 1123 subdomain check, as the API server enforces on namespace names.
pub fn is_dns1123_subdomain(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.bytes().next().is_some_and(|b| b.is_ascii_alphanumeric())
            && label.bytes().last().is_some_and(|b| b.is_ascii_alphanumeric())
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    })
}
