use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use super::{Indexer, IndexingOpts, SinkError};

/// Writes each flush as one JSON file under the results directory, named by
/// the batch label. Local storage is organized per run, not per test case.
pub struct LocalIndexer {
    directory: PathBuf,
}

impl LocalIndexer {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl Indexer for LocalIndexer {
    async fn index(&self, documents: &[Value], opts: &IndexingOpts) -> Result<String, SinkError> {
        let label = opts.batch_label.as_deref().unwrap_or("ingress-bench");
        let path = self.directory.join(format!("{label}.json"));
        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(&path, serde_json::to_vec_pretty(documents)?).await?;
        Ok(format!(
            "wrote {} documents to {}",
            documents.len(),
            path.display()
        ))
    }
}
