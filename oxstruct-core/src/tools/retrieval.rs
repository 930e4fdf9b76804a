//! Retrieval tool driver.
//!
//! Per run: create a vector store with an inactivity TTL, upload the routed
//! files and attach them as a batch, then poll for indexing readiness.
//! Transient failures retry with exponential backoff. A readiness timeout is
//! only a warning — stores are usually queryable while still indexing — but a
//! FAILED status stops the run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::types::VectorStoreStatus;
use crate::api::ApiClient;
use crate::attach::plan::ToolKind;
use crate::cleanup::{CleanupLedger, RemoteObject};
use crate::error::{OxError, Result};
use crate::tools::{ServiceHealth, ToolDriver};
use crate::upload::SharedUploadManager;

/// Provider file size limit for retrieval uploads (100 MiB).
pub const MAX_RETRIEVAL_FILE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub store_name: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub index_timeout: Duration,
    pub poll_interval: Duration,
    pub ttl_days: u32,
    pub cleanup: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            store_name: "oxstruct_store".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            index_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            ttl_days: 7,
            cleanup: true,
        }
    }
}

pub struct RetrievalDriver {
    client: ApiClient,
    uploads: Arc<SharedUploadManager>,
    ledger: Arc<CleanupLedger>,
    config: RetrievalConfig,
    store_id: Mutex<Option<String>>,
}

impl RetrievalDriver {
    pub fn new(
        client: ApiClient,
        uploads: Arc<SharedUploadManager>,
        ledger: Arc<CleanupLedger>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            client,
            uploads,
            ledger,
            config,
            store_id: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    async fn create_store_with_retry(&self) -> Result<String> {
        let mut last_error: Option<OxError> = None;

        for attempt in 0..=self.config.max_retries {
            debug!(
                name = %self.config.store_name,
                attempt = attempt + 1,
                "creating vector store"
            );
            match self
                .client
                .create_vector_store(&self.config.store_name, self.config.ttl_days)
                .await
            {
                Ok(store) => {
                    info!(id = %store.id, "created vector store");
                    self.ledger
                        .record(RemoteObject::VectorStore(store.id.clone()))
                        .await;
                    *self.store_id.lock().await = Some(store.id.clone());
                    return Ok(store.id);
                }
                Err(err) => {
                    warn!(attempt = attempt + 1, "vector store creation failed: {err}");
                    last_error = Some(err);
                    if attempt < self.config.max_retries {
                        let delay = self.config.retry_delay * 2u32.pow(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(OxError::VectorStoreFailed(format!(
            "creation failed after {} attempts: {}",
            self.config.max_retries + 1,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn attach_batch_with_retry(&self, store_id: &str, file_ids: &[String]) -> Result<()> {
        let mut last_error: Option<OxError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.client.attach_file_batch(store_id, file_ids).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt = attempt + 1, "file batch attach failed: {err}");
                    last_error = Some(err);
                    if attempt < self.config.max_retries {
                        let delay = self.config.retry_delay * 2u32.pow(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(OxError::VectorStoreFailed(format!(
            "file batch attach failed after {} attempts: {}",
            self.config.max_retries + 1,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Poll until the store is ready or failed. Timing out is not fatal.
    async fn wait_for_ready(&self, store_id: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.index_timeout;

        while tokio::time::Instant::now() < deadline {
            match self.client.retrieve_vector_store(store_id).await {
                Ok(store) => match store.status {
                    VectorStoreStatus::Completed => {
                        debug!(id = %store_id, "vector store ready");
                        return Ok(());
                    }
                    VectorStoreStatus::Failed => {
                        return Err(OxError::VectorStoreFailed(format!(
                            "vector store {store_id} failed to index"
                        )));
                    }
                    status => {
                        debug!(id = %store_id, ?status, "vector store still indexing");
                    }
                },
                Err(err) => {
                    warn!(id = %store_id, "status poll failed: {err}");
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        warn!(
            id = %store_id,
            timeout = ?self.config.index_timeout,
            "vector store not ready before timeout, proceeding (indexing is usually already queryable)"
        );
        Ok(())
    }
}

#[async_trait]
impl ToolDriver for RetrievalDriver {
    fn kind(&self) -> ToolKind {
        ToolKind::Retrieval
    }

    async fn prepare(&self) -> Result<Value> {
        // Pre-validate the routed files before creating anything remote.
        for path in self.uploads.paths_for(ToolKind::Retrieval).await {
            validate_retrieval_file(&path)?;
        }

        let store_id = self.create_store_with_retry().await?;

        self.uploads.upload_for(ToolKind::Retrieval).await?;
        let file_ids = self.uploads.ids_for(ToolKind::Retrieval).await;
        if !file_ids.is_empty() {
            self.attach_batch_with_retry(&store_id, &file_ids).await?;
        }

        self.wait_for_ready(&store_id).await?;

        Ok(json!({
            "type": "file_search",
            "vector_store_ids": [store_id],
        }))
    }

    async fn cleanup(&self) {
        if !self.config.cleanup {
            return;
        }
        // Uploaded file ids first, then the store itself.
        self.uploads.cleanup().await;
        let store_id = self.store_id.lock().await.take();
        if let Some(id) = store_id {
            if let Err(err) = self.client.delete_vector_store(&id).await {
                warn!(id = %id, "failed to delete vector store: {err}");
            } else {
                debug!(id = %id, "deleted vector store");
            }
        }
    }

    async fn health_check(&self) -> ServiceHealth {
        if self.config.store_name.is_empty() {
            ServiceHealth::unhealthy("vector store name is empty")
        } else if self.config.max_retries == 0 {
            ServiceHealth::degraded("retries disabled")
        } else {
            ServiceHealth::healthy()
        }
    }
}

/// Pre-validate files for retrieval upload: empty and oversize files are
/// rejected, unknown extensions only warn.
pub fn validate_retrieval_file(path: &std::path::Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|_| OxError::NotFound {
        path: path.to_path_buf(),
    })?;
    if metadata.len() == 0 {
        return Err(OxError::Usage(format!(
            "cannot index empty file: {}",
            path.display()
        )));
    }
    if metadata.len() > MAX_RETRIEVAL_FILE_BYTES {
        return Err(OxError::Usage(format!(
            "file too large for retrieval ({} bytes, max {MAX_RETRIEVAL_FILE_BYTES}): {}",
            metadata.len(),
            path.display()
        )));
    }
    Ok(())
}
