//! Code-executor tool driver.
//!
//! Uploads routed files through the shared manager, builds the
//! code-interpreter tool config, and recovers generated artifacts from the
//! response: container-file citations in messages plus `file` outputs on
//! tool-call items. Downloads split on the id prefix — `cfile_` ids go to the
//! container-files endpoint, everything else to the regular files endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::types::{Annotation, ApiResponse, OutputItem};
use crate::api::ApiClient;
use crate::attach::plan::ToolKind;
use crate::error::{OxError, Result};
use crate::tools::{ServiceHealth, ToolDriver};
use crate::upload::SharedUploadManager;

/// Files larger than this trigger an advisory warning after download.
const LARGE_ARTIFACT_BYTES: u64 = 100 * 1024 * 1024;

const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "com", "scr", "sh", "ps1", "msi"];

/// How to resolve name collisions in the download directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateStrategy {
    #[default]
    Overwrite,
    Rename,
    Skip,
}

impl std::str::FromStr for DuplicateStrategy {
    type Err = OxError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "overwrite" => Ok(DuplicateStrategy::Overwrite),
            "rename" => Ok(DuplicateStrategy::Rename),
            "skip" => Ok(DuplicateStrategy::Skip),
            other => Err(OxError::Usage(format!(
                "unknown duplicate-output strategy '{other}' (expected overwrite, rename, or skip)"
            ))),
        }
    }
}

/// Post-download validation level. Validation is advisory: it warns, never
/// blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationLevel {
    Off,
    #[default]
    Basic,
    Strict,
}

impl std::str::FromStr for ValidationLevel {
    type Err = OxError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "off" => Ok(ValidationLevel::Off),
            "basic" => Ok(ValidationLevel::Basic),
            "strict" => Ok(ValidationLevel::Strict),
            other => Err(OxError::Usage(format!(
                "unknown validation level '{other}' (expected off, basic, or strict)"
            ))),
        }
    }
}

/// Artifact recovery strategy when strict structured output is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadStrategy {
    #[default]
    SinglePass,
    TwoPassSentinel,
}

impl std::str::FromStr for DownloadStrategy {
    type Err = OxError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "single_pass" => Ok(DownloadStrategy::SinglePass),
            "two_pass_sentinel" => Ok(DownloadStrategy::TwoPassSentinel),
            other => Err(OxError::Usage(format!(
                "unknown download strategy '{other}' (expected single_pass or two_pass_sentinel)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeExecConfig {
    pub download_dir: PathBuf,
    pub cleanup: bool,
    pub duplicate_outputs: DuplicateStrategy,
    pub validation: ValidationLevel,
    pub download_strategy: DownloadStrategy,
}

impl Default for CodeExecConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            cleanup: true,
            duplicate_outputs: DuplicateStrategy::default(),
            validation: ValidationLevel::default(),
            download_strategy: DownloadStrategy::default(),
        }
    }
}

/// File annotation extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnnotation {
    pub file_id: String,
    pub container_id: Option<String>,
    pub filename: String,
}

pub struct CodeExecDriver {
    client: ApiClient,
    uploads: Arc<SharedUploadManager>,
    config: CodeExecConfig,
}

impl CodeExecDriver {
    pub fn new(client: ApiClient, uploads: Arc<SharedUploadManager>, config: CodeExecConfig) -> Self {
        Self {
            client,
            uploads,
            config,
        }
    }

    pub fn config(&self) -> &CodeExecConfig {
        &self.config
    }

    /// Walk the response for file annotations: `container_file_citation`
    /// annotations on message content blocks and `file` outputs on
    /// code-interpreter tool calls.
    pub fn collect_annotations(response: &ApiResponse) -> Vec<FileAnnotation> {
        let mut annotations = Vec::new();

        for item in &response.output {
            match item {
                OutputItem::Message { content, .. } => {
                    for block in content {
                        for annotation in &block.annotations {
                            if let Annotation::ContainerFileCitation {
                                file_id,
                                container_id,
                                filename,
                            } = annotation
                            {
                                annotations.push(FileAnnotation {
                                    file_id: file_id.clone(),
                                    container_id: container_id.clone(),
                                    filename: filename.clone().unwrap_or_else(|| file_id.clone()),
                                });
                            }
                        }
                    }
                }
                OutputItem::CodeInterpreterCall { outputs, .. } => {
                    for output in outputs {
                        if output.kind.as_deref() == Some("file") {
                            if let Some(file_id) = &output.file_id {
                                annotations.push(FileAnnotation {
                                    file_id: file_id.clone(),
                                    container_id: None,
                                    filename: output
                                        .filename
                                        .clone()
                                        .unwrap_or_else(|| file_id.clone()),
                                });
                            }
                        }
                    }
                }
                OutputItem::Other(_) => {}
            }
        }

        annotations
    }

    /// Download every artifact cited by the response into the configured
    /// download directory. Returns the local paths written.
    pub async fn download_generated_files(&self, response: &ApiResponse) -> Result<Vec<PathBuf>> {
        let annotations = Self::collect_annotations(response);
        if annotations.is_empty() {
            debug!("no file annotations in response");
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|e| {
                OxError::DownloadFailed(format!(
                    "cannot create download directory {}: {e}",
                    self.config.download_dir.display()
                ))
            })?;

        let mut downloaded = Vec::new();
        for annotation in annotations {
            let content = self.fetch_artifact(&annotation).await?;

            let target = self.config.download_dir.join(&annotation.filename);
            let resolved = match resolve_conflict(&target, self.config.duplicate_outputs) {
                Some(path) => path,
                None => {
                    info!(path = %target.display(), "skipping existing artifact");
                    continue;
                }
            };

            tokio::fs::write(&resolved, &content).await.map_err(|e| {
                OxError::DownloadFailed(format!("cannot write {}: {e}", resolved.display()))
            })?;

            validate_artifact(&resolved, self.config.validation);
            info!(path = %resolved.display(), "downloaded generated file");
            downloaded.push(resolved);
        }

        Ok(downloaded)
    }

    async fn fetch_artifact(&self, annotation: &FileAnnotation) -> Result<Vec<u8>> {
        match (&annotation.container_id, annotation.file_id.starts_with("cfile_")) {
            (Some(container_id), true) => {
                debug!(file = %annotation.file_id, container = %container_id, "downloading via container endpoint");
                self.client
                    .download_container_file(container_id, &annotation.file_id)
                    .await
            }
            _ => {
                debug!(file = %annotation.file_id, "downloading via files endpoint");
                self.client.file_content(&annotation.file_id).await
            }
        }
    }
}

#[async_trait]
impl ToolDriver for CodeExecDriver {
    fn kind(&self) -> ToolKind {
        ToolKind::CodeExec
    }

    async fn prepare(&self) -> Result<Value> {
        self.uploads.upload_for(ToolKind::CodeExec).await?;
        let file_ids = self.uploads.ids_for(ToolKind::CodeExec).await;
        Ok(json!({
            "type": "code_interpreter",
            "container": {"type": "auto", "file_ids": file_ids},
        }))
    }

    async fn cleanup(&self) {
        if self.config.cleanup {
            self.uploads.cleanup().await;
        }
    }

    async fn health_check(&self) -> ServiceHealth {
        if self.config.download_dir.as_os_str().is_empty() {
            ServiceHealth::unhealthy("download directory is empty")
        } else {
            ServiceHealth::healthy()
        }
    }
}

/// Apply the duplicate-output strategy. `None` means skip the artifact.
fn resolve_conflict(target: &Path, strategy: DuplicateStrategy) -> Option<PathBuf> {
    if !target.exists() {
        return Some(target.to_path_buf());
    }
    match strategy {
        DuplicateStrategy::Overwrite => Some(target.to_path_buf()),
        DuplicateStrategy::Skip => None,
        DuplicateStrategy::Rename => {
            let stem = target
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            let extension = target.extension().map(|e| e.to_string_lossy().into_owned());
            let parent = target.parent().unwrap_or_else(|| Path::new("."));
            for counter in 1u32.. {
                let candidate = match &extension {
                    Some(ext) => parent.join(format!("{stem}_{counter}.{ext}")),
                    None => parent.join(format!("{stem}_{counter}")),
                };
                if !candidate.exists() {
                    return Some(candidate);
                }
            }
            None
        }
    }
}

/// Advisory artifact validation. Emits warnings only.
fn validate_artifact(path: &Path, level: ValidationLevel) {
    if level == ValidationLevel::Off {
        return;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.len() > LARGE_ARTIFACT_BYTES {
            warn!(path = %path.display(), "downloaded artifact exceeds 100MiB");
        }
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    if extension
        .as_deref()
        .is_some_and(|e| EXECUTABLE_EXTENSIONS.contains(&e))
    {
        warn!(path = %path.display(), "downloaded artifact has an executable extension");
    }

    if level == ValidationLevel::Strict {
        if name.starts_with('.') {
            warn!(path = %path.display(), "downloaded artifact is hidden");
        }
        if name.matches('.').count() > 1 {
            warn!(path = %path.display(), "downloaded artifact has multiple extensions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupLedger;
    use crate::fileio::identity::HashAlgorithm;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response_with_citation() -> ApiResponse {
        serde_json::from_value(json!({
            "output": [
                {
                    "type": "message",
                    "content": [{
                        "text": "made a plot",
                        "annotations": [{
                            "type": "container_file_citation",
                            "file_id": "cfile_plot",
                            "container_id": "cont_1",
                            "filename": "plot.png"
                        }]
                    }]
                },
                {
                    "type": "code_interpreter_call",
                    "outputs": [{"type": "file", "file_id": "file_csv", "filename": "out.csv"}]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn collects_both_annotation_sources() {
        let annotations = CodeExecDriver::collect_annotations(&response_with_citation());
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].file_id, "cfile_plot");
        assert_eq!(annotations[0].container_id.as_deref(), Some("cont_1"));
        assert_eq!(annotations[1].filename, "out.csv");
        assert_eq!(annotations[1].container_id, None);
    }

    #[test]
    fn rename_strategy_numbers_conflicts() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.csv");
        std::fs::write(&target, "first").unwrap();
        std::fs::write(dir.path().join("out_1.csv"), "second").unwrap();

        let resolved = resolve_conflict(&target, DuplicateStrategy::Rename).unwrap();
        assert!(resolved.ends_with("out_2.csv"));
    }

    #[test]
    fn skip_strategy_returns_none_on_conflict() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.csv");
        std::fs::write(&target, "first").unwrap();
        assert_eq!(resolve_conflict(&target, DuplicateStrategy::Skip), None);
        assert_eq!(
            resolve_conflict(&target, DuplicateStrategy::Overwrite),
            Some(target.clone())
        );
    }

    async fn driver_for(server: &MockServer, download_dir: PathBuf) -> CodeExecDriver {
        let client = ApiClient::with_base_url("test-key", server.uri());
        let ledger = Arc::new(CleanupLedger::new());
        let uploads = Arc::new(SharedUploadManager::new(
            client.clone(),
            ledger,
            HashAlgorithm::Sha256,
        ));
        CodeExecDriver::new(
            client,
            uploads,
            CodeExecConfig {
                download_dir,
                ..CodeExecConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn downloads_container_and_regular_files() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(url_path("/containers/cont_1/files/cfile_plot/content"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "4"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/containers/cont_1/files/cfile_plot/content"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png!".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/files/file_csv/content"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let driver = driver_for(&server, dir.path().join("downloads")).await;
        let paths = driver
            .download_generated_files(&response_with_citation())
            .await
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"png!");
        assert_eq!(std::fs::read(&paths[1]).unwrap(), b"a,b\n");
    }

    #[tokio::test]
    async fn missing_container_surfaces_container_expired() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let driver = driver_for(&server, dir.path().to_path_buf()).await;
        let mut response = response_with_citation();
        response.output.truncate(1);

        let err = driver.download_generated_files(&response).await.unwrap_err();
        assert!(matches!(err, OxError::ContainerExpired { .. }));
    }

    #[tokio::test]
    async fn rate_limit_surfaces_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let driver = driver_for(&server, dir.path().to_path_buf()).await;
        let mut response = response_with_citation();
        response.output.truncate(1);

        let err = driver.download_generated_files(&response).await.unwrap_err();
        assert!(matches!(err, OxError::RateLimited(_)));
    }

    #[tokio::test]
    async fn oversize_preflight_refuses_download() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", format!("{}", 200u64 * 1024 * 1024)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let driver = driver_for(&server, dir.path().to_path_buf()).await;
        let mut response = response_with_citation();
        response.output.truncate(1);

        let err = driver.download_generated_files(&response).await.unwrap_err();
        assert!(matches!(err, OxError::DownloadFailed(_)));
    }

    #[tokio::test]
    async fn prepare_builds_container_config() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let driver = driver_for(&server, dir.path().to_path_buf()).await;

        let config = driver.prepare().await.unwrap();
        assert_eq!(config["type"], "code_interpreter");
        assert_eq!(config["container"]["type"], "auto");
        assert!(config["container"]["file_ids"].as_array().unwrap().is_empty());
    }
}
