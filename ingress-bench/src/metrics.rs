//! Thin Prometheus query handle, handed opaquely to the benchmark driver.

use std::time::Duration;

use envconfig::Envconfig;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("prometheus query failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Envconfig, Clone, Debug)]
pub struct PromConfig {
    #[envconfig(from = "INGRESS_BENCH_PROM_URL")]
    pub url: Option<String>,

    #[envconfig(from = "INGRESS_BENCH_PROM_TOKEN")]
    pub token: Option<String>,

    #[envconfig(from = "INGRESS_BENCH_PROM_TIMEOUT_SECS", default = "30")]
    pub query_timeout_secs: u64,
}

impl Default for PromConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            query_timeout_secs: 30,
        }
    }
}

pub struct MetricsClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl MetricsClient {
    /// None when no Prometheus URL is configured; metrics are optional.
    pub fn from_env() -> Option<Self> {
        let pc = PromConfig::init_from_env().ok().unwrap_or_default();
        Self::from_config(pc)
    }

    pub fn from_config(pc: PromConfig) -> Option<Self> {
        let base = pc.url.filter(|s| !s.is_empty())?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(pc.query_timeout_secs))
            .build()
            .ok()?;
        Some(Self {
            base: base.trim_end_matches('/').to_string(),
            token: pc.token.filter(|s| !s.is_empty()),
            http,
        })
    }

    /// Evaluate an instant query and return the first vector sample.
    /// Non-success responses and empty results yield 0.0 rather than an
    /// error; a missing series is not worth failing a benchmark over.
    #[tracing::instrument(skip(self), fields(expr = %expr))]
    pub async fn query_instant(&self, expr: &str) -> Result<f64, MetricsError> {
        let url = format!("{}/api/v1/query", self.base);
        let mut req = self.http.get(url).query(&[("query", expr)]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            return Ok(0.0);
        }
        let body: Value = res.json().await?;
        Ok(first_vector_value(&body).unwrap_or(0.0))
    }
}

fn first_vector_value(body: &Value) -> Option<f64> {
    body.get("data")?
        .get("result")?
        .as_array()?
        .first()?
        .get("value")?
        .as_array()?
        .get(1)?
        .as_str()?
        .parse()
        .ok()
}
