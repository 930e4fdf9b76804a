//! Attachment specifications.
//!
//! An [`AttachmentSpec`] is the immutable record produced by the resolver for
//! every `--file`, `--dir`, and `--collect` occurrence (collections expand to
//! one spec per filelist line). Routing targets select which tools see the
//! attachment.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{OxError, Result};

/// Where an attachment is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    /// In-prompt template access only.
    Template,
    /// Upload for the sandboxed code executor.
    CodeExec,
    /// Upload into the retrieval vector store.
    Retrieval,
}

impl Target {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "prompt" | "template" => Ok(Target::Template),
            "ci" | "code" | "code-exec" => Ok(Target::CodeExec),
            "fs" | "search" | "retrieval" => Ok(Target::Retrieval),
            other => Err(OxError::Usage(format!(
                "unknown attachment target '{other}' (expected prompt, ci, or fs)"
            ))),
        }
    }
}

/// Original attachment family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKind {
    File,
    Dir,
    Collection,
}

#[derive(Debug, Clone)]
pub struct AttachmentSpec {
    /// Unique per-run identifier, valid as a template variable name.
    pub alias: String,
    /// Gate-validated absolute path.
    pub path: PathBuf,
    /// Non-empty set of routing targets.
    pub targets: BTreeSet<Target>,
    pub kind: AttachKind,
    /// Directory attachments: recurse into subdirectories.
    pub recursive: bool,
    /// Directory attachments: glob filter on file names.
    pub glob: Option<String>,
    /// Whether this spec came from a `--collect` filelist line.
    pub from_collection: bool,
    /// Base alias of the owning collection, when `from_collection`.
    pub collection_alias: Option<String>,
    /// Disable gitignore semantics during directory expansion.
    pub ignore_ignore_file: bool,
    /// Custom ignore-file path overriding the default lookup.
    pub ignore_file_override: Option<PathBuf>,
}

impl AttachmentSpec {
    pub fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    pub fn targets_tool(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }
}

/// Derive a template-safe alias from a file name: non-identifier characters
/// become `_`, and a leading digit gets a `_` prefix.
pub fn derive_alias(path: &std::path::Path) -> String {
    let stem = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let mut alias: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if alias.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        alias.insert(0, '_');
    }
    if alias.is_empty() {
        alias.push('_');
    }
    alias
}

/// Validate a user-supplied alias as `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_alias(alias: &str) -> Result<()> {
    let mut chars = alias.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_head && valid_tail {
        Ok(())
    } else {
        Err(OxError::Usage(format!(
            "invalid alias '{alias}': must match [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}
