use std::path::PathBuf;

use async_trait::async_trait;
use keyward_core::entities::Instance;
use keyward_core::ports::InstanceCatalog;
use keyward_core::Error;
use tokio::fs;
use tracing::{debug, instrument};

/// Instance list read from a JSON array on disk
pub struct FileInstanceCatalog {
    path: PathBuf,
}

impl FileInstanceCatalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl InstanceCatalog for FileInstanceCatalog {
    #[instrument(skip(self))]
    async fn instances(&self) -> Result<Vec<Instance>, Error> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!(path = ?self.path, "instance list not found, no instances");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Other(format!("failed to parse instance list: {}", e)))
    }
}
