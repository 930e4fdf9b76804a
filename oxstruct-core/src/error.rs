//! Error taxonomy for the execution pipeline.
//!
//! Every error kind maps to exactly one process exit code. Variants carry the
//! structured context needed to print an actionable message; credential
//! redaction happens in [`OxError::user_message`], so callers can surface any
//! of these directly.

use std::path::PathBuf;

use crate::sanitize::redact_secrets;

/// Process exit codes for the CLI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    InternalError = 1,
    UsageError = 2,
    ValidationError = 3,
    ApiError = 4,
    OperationTimeout = 5,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

/// Classified remote API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    RateLimit,
    Authentication,
    ContextLength,
    InvalidRequest,
    Network,
    Server,
}

impl ApiErrorKind {
    /// Remediation hint attached to user-visible API errors.
    pub fn hint(&self) -> &'static str {
        match self {
            ApiErrorKind::RateLimit => {
                "Rate limited by the provider. Wait a moment and retry, or reduce request frequency."
            }
            ApiErrorKind::Authentication => {
                "Authentication failed. Check that the API key environment variable is set and valid."
            }
            ApiErrorKind::ContextLength => {
                "The request exceeds the model context window. Route large files to code execution (-fc) or retrieval (-fs) instead of the template."
            }
            ApiErrorKind::InvalidRequest => {
                "The provider rejected the request. Check the model id and parameter values."
            }
            ApiErrorKind::Network => "Network error reaching the provider. Check connectivity and retry.",
            ApiErrorKind::Server => "The provider returned a server error. Retry shortly.",
        }
    }
}

/// A per-file rerouting suggestion produced by the token budget validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerouteSuggestion {
    pub path: PathBuf,
    pub tokens: usize,
    /// Recommended flags, e.g. `-fc data.csv`.
    pub flags: Vec<String>,
}

/// Per-file upload failure diagnostics.
#[derive(Debug, Clone)]
pub struct UploadFailure {
    pub path: PathBuf,
    pub message: String,
}

/// The error taxonomy of the pipeline. One variant per kind; `exit_code`
/// is total over the enum.
#[derive(Debug, thiserror::Error)]
pub enum OxError {
    #[error("access denied: {path} is outside every allowed directory")]
    PathDenied {
        path: PathBuf,
        base: PathBuf,
        allowed: Vec<PathBuf>,
    },

    #[error("path traversal detected: {path} escapes the allowed roots")]
    Traversal { path: PathBuf },

    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("invalid schema: {message}")]
    SchemaInvalid {
        message: String,
        /// Schema location, e.g. `properties/items`.
        path: String,
        tips: Vec<String>,
    },

    #[error("duplicate variable name: {0}")]
    VarDup(String),

    #[error("duplicate attachment alias: {0}")]
    AliasDup(String),

    #[error("{0}")]
    Usage(String),

    #[error("collection entry failed ({filelist}:{line}): {message}")]
    CollectLineFailed {
        filelist: PathBuf,
        line: usize,
        message: String,
    },

    #[error("prompt too large: {total_tokens} tokens exceeds the {limit}-token context window")]
    PromptTooLarge {
        total_tokens: usize,
        limit: usize,
        suggestions: Vec<RerouteSuggestion>,
    },

    #[error("invalid parameter {name}: {message}")]
    ParamInvalid { name: String, message: String },

    #[error("upload failed for {} file(s)", failures.len())]
    UploadFailed { failures: Vec<UploadFailure> },

    #[error("container expired or file missing: {file_id}")]
    ContainerExpired { container_id: String, file_id: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("rate limited while downloading {0}")]
    RateLimited(String),

    #[error("vector store operation failed: {0}")]
    VectorStoreFailed(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("API error: {message}")]
    Api {
        kind: ApiErrorKind,
        message: String,
        status: Option<u16>,
    },

    #[error("operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OxError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            OxError::PathDenied { .. }
            | OxError::Traversal { .. }
            | OxError::NotFound { .. }
            | OxError::SchemaInvalid { .. }
            | OxError::PromptTooLarge { .. }
            | OxError::ParamInvalid { .. } => ExitCode::ValidationError,

            OxError::VarDup(_)
            | OxError::AliasDup(_)
            | OxError::Usage(_)
            | OxError::CollectLineFailed { .. }
            | OxError::PolicyViolation(_) => ExitCode::UsageError,

            OxError::UploadFailed { .. }
            | OxError::ContainerExpired { .. }
            | OxError::DownloadFailed(_)
            | OxError::RateLimited(_)
            | OxError::VectorStoreFailed(_)
            | OxError::Api { .. } => ExitCode::ApiError,

            OxError::Timeout { .. } => ExitCode::OperationTimeout,

            OxError::Internal(_) => ExitCode::InternalError,
        }
    }

    /// Render the full user-facing message with remediation hints, with
    /// credentials redacted regardless of where the message originated.
    pub fn user_message(&self) -> String {
        let mut out = self.to_string();
        match self {
            OxError::PathDenied { base, allowed, .. } => {
                out.push_str(&format!("\n  base directory: {}", base.display()));
                for dir in allowed {
                    out.push_str(&format!("\n  allowed: {}", dir.display()));
                }
            }
            OxError::SchemaInvalid { path, tips, .. } => {
                out.push_str(&format!("\n  at: {path}"));
                for tip in tips {
                    out.push_str(&format!("\n  tip: {tip}"));
                }
            }
            OxError::PromptTooLarge { suggestions, .. } => {
                for s in suggestions {
                    let name = s.path.display();
                    out.push_str(&format!(
                        "\n  {name} ({} tokens): try {}",
                        s.tokens,
                        s.flags.join(" or ")
                    ));
                }
            }
            OxError::UploadFailed { failures } => {
                for (idx, failure) in failures.iter().enumerate() {
                    out.push_str(&format!(
                        "\n  {}. {}: {}",
                        idx + 1,
                        failure.path.display(),
                        failure.message
                    ));
                }
            }
            OxError::ContainerExpired { container_id, .. } => {
                out.push_str(&format!(
                    "\n  container {container_id} is gone; containers live ~20 minutes (2 minutes idle). Re-run to create a fresh container."
                ));
            }
            OxError::Api { kind, .. } => {
                out.push_str(&format!("\n  {}", kind.hint()));
            }
            OxError::Timeout { timeout_secs } => {
                out.push_str(&format!(
                    "\n  Consider doubling the timeout (--timeout {}). Note the code-execution container itself expires after ~20 minutes.",
                    timeout_secs * 2
                ));
            }
            _ => {}
        }
        redact_secrets(out)
    }
}

/// Pipeline-wide result alias.
pub type Result<T> = std::result::Result<T, OxError>;
