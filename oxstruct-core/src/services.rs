//! Service container.
//!
//! Owns lazy singletons for the tool drivers and the shared upload manager.
//! Per-tool configuration is validated at construction; cleanup fans out
//! concurrently and collects failures instead of raising.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::api::ApiClient;
use crate::cleanup::CleanupLedger;
use crate::error::{OxError, Result};
use crate::fileio::identity::HashAlgorithm;
use crate::tools::code_exec::{CodeExecConfig, CodeExecDriver};
use crate::tools::remote::{RemoteEndpoint, RemoteToolAdapter};
use crate::tools::retrieval::{RetrievalConfig, RetrievalDriver};
use crate::tools::{ServiceHealth, ServiceStatus, ToolDriver};
use crate::upload::SharedUploadManager;

/// Retrieval chunking settings, validated at container construction.
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 800,
            chunk_overlap_tokens: 400,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    pub code_exec: CodeExecConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkSettings,
    /// Extension filter for code-exec uploads; entries must be `.`-prefixed.
    pub code_exec_extensions: Vec<String>,
    pub endpoints: Vec<RemoteEndpoint>,
}

pub struct ServiceContainer {
    client: ApiClient,
    uploads: Arc<SharedUploadManager>,
    config: ToolsConfig,
    code_exec: OnceCell<Arc<CodeExecDriver>>,
    retrieval: OnceCell<Arc<RetrievalDriver>>,
    remote: OnceCell<Arc<RemoteToolAdapter>>,
    ledger: Arc<CleanupLedger>,
}

impl ServiceContainer {
    /// Validate the configuration and build the container. Drivers are not
    /// instantiated until first use.
    pub fn new(
        client: ApiClient,
        ledger: Arc<CleanupLedger>,
        algorithm: HashAlgorithm,
        config: ToolsConfig,
    ) -> Result<Self> {
        validate_config(&config)?;
        let uploads = Arc::new(SharedUploadManager::new(
            client.clone(),
            ledger.clone(),
            algorithm,
        ));
        Ok(Self {
            client,
            uploads,
            config,
            code_exec: OnceCell::new(),
            retrieval: OnceCell::new(),
            remote: OnceCell::new(),
            ledger,
        })
    }

    pub fn uploads(&self) -> Arc<SharedUploadManager> {
        self.uploads.clone()
    }

    pub fn ledger(&self) -> Arc<CleanupLedger> {
        self.ledger.clone()
    }

    pub async fn code_exec(&self) -> Arc<CodeExecDriver> {
        self.code_exec
            .get_or_init(|| async {
                debug!("instantiating code-exec driver");
                Arc::new(CodeExecDriver::new(
                    self.client.clone(),
                    self.uploads.clone(),
                    self.config.code_exec.clone(),
                ))
            })
            .await
            .clone()
    }

    pub async fn retrieval(&self) -> Arc<RetrievalDriver> {
        self.retrieval
            .get_or_init(|| async {
                debug!("instantiating retrieval driver");
                Arc::new(RetrievalDriver::new(
                    self.client.clone(),
                    self.uploads.clone(),
                    self.ledger.clone(),
                    self.config.retrieval.clone(),
                ))
            })
            .await
            .clone()
    }

    pub async fn remote(&self) -> Result<Arc<RemoteToolAdapter>> {
        self.remote
            .get_or_try_init(|| async {
                debug!("instantiating remote tool adapter");
                RemoteToolAdapter::new(self.config.endpoints.clone()).map(Arc::new)
            })
            .await
            .cloned()
    }

    pub fn has_endpoints(&self) -> bool {
        !self.config.endpoints.is_empty()
    }

    /// Health of a named service; services never instantiated report
    /// `Unknown`.
    pub async fn health_check(&self, name: &str) -> ServiceHealth {
        match name {
            "code-exec" => match self.code_exec.get() {
                Some(driver) => driver.health_check().await,
                None => unknown("code-exec driver not instantiated"),
            },
            "retrieval" => match self.retrieval.get() {
                Some(driver) => driver.health_check().await,
                None => unknown("retrieval driver not instantiated"),
            },
            "remote-tool" => match self.remote.get() {
                Some(adapter) => adapter.health_check().await,
                None => unknown("remote tool adapter not instantiated"),
            },
            other => unknown(format!("unknown service '{other}'")),
        }
    }

    /// Concurrent best-effort cleanup of every instantiated driver.
    pub async fn cleanup(&self) {
        let mut futures: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>>> =
            Vec::new();
        if let Some(driver) = self.code_exec.get() {
            let driver = driver.clone();
            futures.push(Box::pin(async move { driver.cleanup().await }));
        }
        if let Some(driver) = self.retrieval.get() {
            let driver = driver.clone();
            futures.push(Box::pin(async move { driver.cleanup().await }));
        }
        if let Some(adapter) = self.remote.get() {
            let adapter = adapter.clone();
            futures.push(Box::pin(async move { adapter.cleanup().await }));
        }
        join_all(futures).await;
    }
}

fn unknown(detail: impl Into<String>) -> ServiceHealth {
    ServiceHealth {
        status: ServiceStatus::Unknown,
        details: vec![detail.into()],
    }
}

fn validate_config(config: &ToolsConfig) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.chunk_size_tokens == 0 {
        return Err(OxError::Usage(
            "retrieval chunk size must be positive".to_string(),
        ));
    }
    if chunking.chunk_overlap_tokens >= chunking.chunk_size_tokens {
        return Err(OxError::Usage(format!(
            "retrieval chunk overlap ({}) must be smaller than the chunk size ({})",
            chunking.chunk_overlap_tokens, chunking.chunk_size_tokens
        )));
    }

    for extension in &config.code_exec_extensions {
        if !extension.starts_with('.') {
            return Err(OxError::Usage(format!(
                "code-exec extension filter entries must start with '.': '{extension}'"
            )));
        }
    }

    for endpoint in &config.endpoints {
        endpoint.validate()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_with(config: ToolsConfig) -> Result<ServiceContainer> {
        ServiceContainer::new(
            ApiClient::with_base_url("test-key", "http://127.0.0.1:9"),
            Arc::new(CleanupLedger::new()),
            HashAlgorithm::Sha256,
            config,
        )
    }

    #[test]
    fn default_config_is_valid() {
        assert!(container_with(ToolsConfig::default()).is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let config = ToolsConfig {
            chunking: ChunkSettings {
                chunk_size_tokens: 400,
                chunk_overlap_tokens: 400,
            },
            ..ToolsConfig::default()
        };
        assert!(matches!(container_with(config), Err(OxError::Usage(_))));
    }

    #[test]
    fn extension_filter_must_be_dot_prefixed() {
        let config = ToolsConfig {
            code_exec_extensions: vec![".csv".to_string(), "txt".to_string()],
            ..ToolsConfig::default()
        };
        assert!(matches!(container_with(config), Err(OxError::Usage(_))));
    }

    #[test]
    fn bad_endpoint_fails_construction() {
        let config = ToolsConfig {
            endpoints: vec![RemoteEndpoint::parse("http://not-loopback.example/x").unwrap()],
            ..ToolsConfig::default()
        };
        assert!(container_with(config).is_err());
    }

    #[tokio::test]
    async fn drivers_are_lazy_singletons() {
        let container = container_with(ToolsConfig::default()).unwrap();
        let health = container.health_check("code-exec").await;
        assert_eq!(health.status, ServiceStatus::Unknown);

        let first = container.code_exec().await;
        let second = container.code_exec().await;
        assert!(Arc::ptr_eq(&first, &second));

        let health = container.health_check("code-exec").await;
        assert_eq!(health.status, ServiceStatus::Healthy);
    }

    #[tokio::test]
    async fn unknown_service_name_reports_unknown() {
        let container = container_with(ToolsConfig::default()).unwrap();
        let health = container.health_check("frobnicator").await;
        assert_eq!(health.status, ServiceStatus::Unknown);
    }
}
