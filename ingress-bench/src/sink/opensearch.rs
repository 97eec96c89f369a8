use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

use super::{Indexer, IndexingOpts, SinkError};

/// Remote search/analytics backend, fed through the `_bulk` endpoint.
pub struct OpenSearchIndexer {
    server: String,
    index: String,
    http: reqwest::Client,
}

impl OpenSearchIndexer {
    pub fn new(server: String, index: String) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            index,
            http,
        })
    }

    fn bulk_body(&self, documents: &[Value]) -> Result<String, SinkError> {
        let action = serde_json::to_string(&json!({"index": {"_index": self.index}}))?;
        let mut body = String::new();
        for doc in documents {
            body.push_str(&action);
            body.push('\n');
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl Indexer for OpenSearchIndexer {
    async fn index(&self, documents: &[Value], _opts: &IndexingOpts) -> Result<String, SinkError> {
        if documents.is_empty() {
            return Ok("no documents to index".to_string());
        }
        let resp = self
            .http
            .post(format!("{}/_bulk", self.server))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(self.bulk_body(documents)?)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SinkError::Endpoint {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: Value = resp.json().await?;
        if parsed.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            return Err(SinkError::Endpoint {
                status: status.as_u16(),
                body: "bulk response reported per-document errors".to_string(),
            });
        }
        Ok(format!(
            "indexed {} documents into {}",
            documents.len(),
            self.index
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_body_interleaves_actions_and_documents() {
        let indexer =
            OpenSearchIndexer::new("http://search:9200".into(), "ingress-bench".into()).unwrap();
        let docs = vec![json!({"a": 1}), json!({"b": 2})];
        let body = indexer.bulk_body(&docs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"index":{"_index":"ingress-bench"}}"#);
        assert_eq!(lines[1], r#"{"a":1}"#);
        assert_eq!(lines[3], r#"{"b":2}"#);
    }

    #[test]
    fn server_url_is_normalized() {
        let indexer =
            OpenSearchIndexer::new("http://search:9200/".into(), "idx".into()).unwrap();
        assert_eq!(indexer.server, "http://search:9200");
    }
}
