use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

mod local;
mod opensearch;

pub use local::LocalIndexer;
pub use opensearch::OpenSearchIndexer;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("indexing endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default)]
pub struct IndexingOpts {
    /// Label for a whole-run flush; local storage keys its output by it.
    pub batch_label: Option<String>,
}

/// The shared flush primitive. Returns a human-readable status message,
/// surfaced as an informational log line on success.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, documents: &[Value], opts: &IndexingOpts) -> Result<String, SinkError>;
}

/// Where results go and when. Cadence is a property of the variant:
/// a streaming sink flushes after every accepted test case, a batch sink
/// flushes exactly once per run, labelled with the run identifier.
pub enum ResultSink {
    Streaming { indexer: Box<dyn Indexer> },
    Batch { indexer: Box<dyn Indexer>, buffer: Vec<Value> },
}

impl ResultSink {
    pub fn streaming(indexer: impl Indexer + 'static) -> Self {
        ResultSink::Streaming {
            indexer: Box::new(indexer),
        }
    }

    pub fn batch(indexer: impl Indexer + 'static) -> Self {
        ResultSink::Batch {
            indexer: Box::new(indexer),
            buffer: Vec::new(),
        }
    }

    /// Take one test case's results. Flush failures are logged and swallowed:
    /// losing telemetry must not abort a run that executed correctly.
    pub async fn accept<T: Serialize>(&mut self, results: &[T]) {
        let docs: Vec<Value> = match results.iter().map(serde_json::to_value).collect() {
            Ok(docs) => docs,
            Err(e) => {
                error!("failed to serialize results: {e}");
                return;
            }
        };
        match self {
            ResultSink::Streaming { indexer } => {
                flush(indexer.as_ref(), &docs, &IndexingOpts::default()).await;
            }
            ResultSink::Batch { buffer, .. } => buffer.extend(docs),
        }
    }

    /// End-of-run flush. A streaming sink has nothing left to do; a batch
    /// sink writes everything it accumulated, tagged with the run identifier.
    pub async fn finish(&mut self, run_uuid: &str) {
        if let ResultSink::Batch { indexer, buffer } = self {
            let opts = IndexingOpts {
                batch_label: Some(run_uuid.to_string()),
            };
            let docs = std::mem::take(buffer);
            flush(indexer.as_ref(), &docs, &opts).await;
        }
    }
}

async fn flush(indexer: &dyn Indexer, docs: &[Value], opts: &IndexingOpts) {
    match indexer.index(docs, opts).await {
        Ok(msg) => info!("{msg}"),
        Err(e) => error!("indexing error: {e}"),
    }
}
