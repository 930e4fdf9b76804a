//! Shared upload manager.
//!
//! Files attached to multiple tools upload exactly once; the remote id fans
//! out to every requesting tool. Directory attachments expand to individual
//! file identities at registration. `upload_for` is complete-or-none: on any
//! failure the caller sees no ids, though already-assigned remote ids stay
//! tracked for cleanup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::attach::plan::{expand_directory, ToolKind};
use crate::attach::spec::Target;
use crate::attach::RoutingPlan;
use crate::cleanup::{CleanupLedger, RemoteObject};
use crate::error::{OxError, Result, UploadFailure};
use crate::fileio::identity::{FileIdentity, HashAlgorithm};

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub remote_id: Option<String>,
    pub pending_tools: Vec<ToolKind>,
    pub completed_tools: Vec<ToolKind>,
    pub size_bytes: u64,
}

#[derive(Default)]
struct UploadState {
    uploads: HashMap<FileIdentity, UploadRecord>,
    /// Per-tool queue, insertion-ordered, deduplicated.
    queue: HashMap<ToolKind, Vec<FileIdentity>>,
    all_remote_ids: Vec<String>,
}

pub struct SharedUploadManager {
    client: ApiClient,
    ledger: Arc<CleanupLedger>,
    algorithm: HashAlgorithm,
    state: Mutex<UploadState>,
}

impl SharedUploadManager {
    pub fn new(client: ApiClient, ledger: Arc<CleanupLedger>, algorithm: HashAlgorithm) -> Self {
        Self {
            client,
            ledger,
            algorithm,
            state: Mutex::new(UploadState::default()),
        }
    }

    /// Register every uploadable attachment of the plan. Re-registering the
    /// same identity only extends its pending-tool set.
    pub async fn register(&self, plan: &RoutingPlan) -> Result<()> {
        let mut state = self.state.lock().await;

        for (target, tool) in [
            (Target::CodeExec, ToolKind::CodeExec),
            (Target::Retrieval, ToolKind::Retrieval),
        ] {
            for spec in plan.specs_for(target) {
                if spec.is_dir() {
                    for file in expand_directory(spec)? {
                        if let Err(err) = register_one(&mut state, file, tool, self.algorithm) {
                            warn!("could not register directory member: {err}");
                        }
                    }
                } else {
                    register_one(&mut state, spec.path.clone(), tool, self.algorithm)?;
                }
            }
        }

        debug!(
            unique_files = state.uploads.len(),
            code_exec = state.queue.get(&ToolKind::CodeExec).map_or(0, Vec::len),
            retrieval = state.queue.get(&ToolKind::Retrieval).map_or(0, Vec::len),
            "registered attachments for upload"
        );
        Ok(())
    }

    /// Ensure every identity queued for `tool` has a remote id, uploading
    /// once where needed. Returns the complete path -> id mapping or fails
    /// with per-file diagnostics, releasing nothing.
    pub async fn upload_for(&self, tool: ToolKind) -> Result<HashMap<PathBuf, String>> {
        let mut state = self.state.lock().await;
        let queued: Vec<FileIdentity> = state.queue.get(&tool).cloned().unwrap_or_default();

        let mut failures: Vec<UploadFailure> = Vec::new();

        for identity in &queued {
            let (path, already_uploaded) = {
                let record = state
                    .uploads
                    .get(identity)
                    .ok_or_else(|| OxError::Internal(anyhow::anyhow!("unregistered identity")))?;
                (record.path.clone(), record.remote_id.is_some())
            };

            if already_uploaded {
                debug!(path = %path.display(), "reusing existing upload");
                continue;
            }

            match self.perform_upload(&path).await {
                Ok(remote_id) => {
                    info!(path = %path.display(), id = %remote_id, "uploaded");
                    self.ledger
                        .record(RemoteObject::File(remote_id.clone()))
                        .await;
                    state.all_remote_ids.push(remote_id.clone());
                    if let Some(record) = state.uploads.get_mut(identity) {
                        record.remote_id = Some(remote_id);
                    }
                }
                Err(err) => {
                    failures.push(UploadFailure {
                        path,
                        message: err.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(OxError::UploadFailed { failures });
        }

        let mut mapping = HashMap::new();
        for identity in &queued {
            if let Some(record) = state.uploads.get_mut(identity) {
                if let Some(id) = &record.remote_id {
                    mapping.insert(record.path.clone(), id.clone());
                    record.pending_tools.retain(|t| *t != tool);
                    if !record.completed_tools.contains(&tool) {
                        record.completed_tools.push(tool);
                    }
                }
            }
        }

        debug!(tool = tool.name(), count = mapping.len(), "uploads complete");
        Ok(mapping)
    }

    /// Remote ids queued for a tool, in registration order. Only ids already
    /// assigned by `upload_for` appear.
    pub async fn ids_for(&self, tool: ToolKind) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .queue
            .get(&tool)
            .into_iter()
            .flatten()
            .filter_map(|identity| {
                state
                    .uploads
                    .get(identity)
                    .and_then(|record| record.remote_id.clone())
            })
            .collect()
    }

    /// File paths queued for a tool, in registration order. Used by drivers
    /// to pre-validate their work list before uploading anything.
    pub async fn paths_for(&self, tool: ToolKind) -> Vec<PathBuf> {
        let state = self.state.lock().await;
        state
            .queue
            .get(&tool)
            .into_iter()
            .flatten()
            .filter_map(|identity| state.uploads.get(identity).map(|record| record.path.clone()))
            .collect()
    }

    /// Snapshot of a record, for diagnostics and tests.
    pub async fn record_for(&self, identity: &FileIdentity) -> Option<UploadRecord> {
        self.state.lock().await.uploads.get(identity).cloned()
    }

    pub async fn uploaded_id_count(&self) -> usize {
        self.state.lock().await.all_remote_ids.len()
    }

    /// Best-effort delete of every uploaded id. Idempotent; errors are
    /// logged, never raised.
    pub async fn cleanup(&self) {
        let ids: Vec<String> = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.all_remote_ids)
        };
        if ids.is_empty() {
            debug!("no uploaded files to clean up");
            return;
        }
        for id in ids {
            if let Err(err) = self.client.delete_file(&id).await {
                warn!(id = %id, "failed to delete uploaded file: {err}");
            } else {
                debug!(id = %id, "deleted uploaded file");
            }
        }
    }

    async fn perform_upload(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await.map_err(|_| OxError::NotFound {
            path: path.to_path_buf(),
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        debug!(path = %path.display(), bytes = bytes.len(), "uploading");

        match self.client.upload_file(&filename, bytes).await {
            Ok(file) => Ok(file.id),
            Err(err) => Err(OxError::Usage(friendly_upload_error(path, &err.to_string()))),
        }
    }
}

fn register_one(
    state: &mut UploadState,
    path: PathBuf,
    tool: ToolKind,
    algorithm: HashAlgorithm,
) -> Result<()> {
    let identity = FileIdentity::of(&path, algorithm)?;
    let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    let record = state
        .uploads
        .entry(identity.clone())
        .or_insert_with(|| UploadRecord {
            path,
            identity: identity.clone(),
            remote_id: None,
            pending_tools: Vec::new(),
            completed_tools: Vec::new(),
            size_bytes,
        });
    if !record.pending_tools.contains(&tool) && !record.completed_tools.contains(&tool) {
        record.pending_tools.push(tool);
    }

    let queue = state.queue.entry(tool).or_default();
    if !queue.contains(&identity) {
        queue.push(identity);
    }
    Ok(())
}

/// Translate provider upload errors into actionable advice. Unsupported
/// extensions suggest template-only routing, which needs no upload at all.
fn friendly_upload_error(path: &Path, error: &str) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    if error.contains("Invalid extension") {
        return format!(
            "cannot upload {name}: the file extension is not supported by the remote tools. \
             Route it to the template instead (drop the ci:/fs: prefix) or rename it with a .txt extension."
        );
    }
    if error.to_ascii_lowercase().contains("too large")
        || error.to_ascii_lowercase().contains("size limit")
    {
        return format!(
            "cannot upload {name}: the file exceeds the provider size limit (typically 100MB). \
             Split it, or route it to the template."
        );
    }
    format!("failed to upload {name}: {error}")
}
