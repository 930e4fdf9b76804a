//! Attachment resolution.
//!
//! Parses the three CLI attachment families into [`AttachmentSpec`] records:
//!
//! - `--file [targets:][alias=]path`
//! - `--dir  [targets:][alias=]path` (with optional recursion and glob)
//! - `--collect [targets:][alias=]@filelist`
//!
//! Targets default to `prompt`. Every path is validated through the security
//! gate before a spec is produced. Aliases are unique per run.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::attach::spec::{derive_alias, validate_alias, AttachKind, AttachmentSpec, Target};
use crate::error::{OxError, Result};
use crate::security::{PathGate, SecurityMode};

/// One raw CLI occurrence, before parsing.
#[derive(Debug, Clone)]
pub struct RawAttachment {
    pub kind: AttachKind,
    /// The full `[targets:][alias=]path` operand.
    pub value: String,
}

/// Options applied to every directory/collection attachment of a run.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub recursive: bool,
    pub glob: Option<String>,
    pub ignore_ignore_file: bool,
    pub ignore_file_override: Option<PathBuf>,
}

pub struct AttachmentResolver<'a> {
    gate: &'a PathGate,
    options: ResolveOptions,
}

impl<'a> AttachmentResolver<'a> {
    pub fn new(gate: &'a PathGate, options: ResolveOptions) -> Self {
        Self { gate, options }
    }

    /// Resolve every raw attachment, enforcing alias uniqueness.
    pub fn resolve(&self, raw: &[RawAttachment]) -> Result<Vec<AttachmentSpec>> {
        let mut specs = Vec::new();
        let mut seen_aliases: HashSet<String> = HashSet::new();

        for attachment in raw {
            let parsed = parse_operand(&attachment.value)?;
            match attachment.kind {
                AttachKind::Collection => {
                    let filelist = parsed
                        .path
                        .strip_prefix('@')
                        .ok_or_else(|| {
                            OxError::Usage(format!(
                                "--collect expects @filelist, got '{}'",
                                parsed.path
                            ))
                        })?
                        .to_string();
                    let expanded = self.resolve_collection(&filelist, &parsed)?;
                    for spec in expanded {
                        self.claim_alias(&mut seen_aliases, &spec.alias)?;
                        specs.push(spec);
                    }
                }
                kind => {
                    let spec = self.resolve_single(kind, &parsed)?;
                    self.claim_alias(&mut seen_aliases, &spec.alias)?;
                    specs.push(spec);
                }
            }
        }

        debug!(count = specs.len(), "resolved attachments");
        Ok(specs)
    }

    fn claim_alias(&self, seen: &mut HashSet<String>, alias: &str) -> Result<()> {
        if !seen.insert(alias.to_string()) {
            return Err(OxError::AliasDup(alias.to_string()));
        }
        Ok(())
    }

    fn resolve_single(&self, kind: AttachKind, parsed: &ParsedOperand) -> Result<AttachmentSpec> {
        let path = self.gate.resolve(Path::new(&parsed.path))?;

        let alias = match &parsed.alias {
            Some(alias) => {
                validate_alias(alias)?;
                alias.clone()
            }
            None => derive_alias(&path),
        };

        if kind == AttachKind::Dir && !path.is_dir() {
            return Err(OxError::Usage(format!(
                "--dir target is not a directory: {}",
                path.display()
            )));
        }

        Ok(AttachmentSpec {
            alias,
            path,
            targets: parsed.targets.clone(),
            kind,
            recursive: self.options.recursive,
            glob: self.options.glob.clone(),
            from_collection: false,
            collection_alias: None,
            ignore_ignore_file: self.options.ignore_ignore_file,
            ignore_file_override: self.options.ignore_file_override.clone(),
        })
    }

    /// Expand a `@filelist` into one spec per non-blank, non-comment line.
    /// Relative lines resolve against the filelist's own directory. A line
    /// that fails validation is a warning in permissive/warn mode and a
    /// run-failing error in strict mode.
    fn resolve_collection(
        &self,
        filelist: &str,
        parsed: &ParsedOperand,
    ) -> Result<Vec<AttachmentSpec>> {
        let list_path = self.gate.resolve(Path::new(filelist))?;
        let content = std::fs::read_to_string(&list_path).map_err(|e| {
            OxError::Usage(format!("cannot read filelist {}: {e}", list_path.display()))
        })?;
        let list_dir = list_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let base_alias = match &parsed.alias {
            Some(alias) => {
                validate_alias(alias)?;
                alias.clone()
            }
            None => derive_alias(&list_path),
        };

        let mut specs = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let candidate = if Path::new(line).is_absolute() {
                PathBuf::from(line)
            } else {
                list_dir.join(line)
            };

            match self.gate.resolve(&candidate) {
                Ok(path) => {
                    specs.push(AttachmentSpec {
                        alias: format!("{base_alias}_{line_no}"),
                        path,
                        targets: parsed.targets.clone(),
                        kind: AttachKind::Collection,
                        recursive: false,
                        glob: None,
                        from_collection: true,
                        collection_alias: Some(base_alias.clone()),
                        ignore_ignore_file: self.options.ignore_ignore_file,
                        ignore_file_override: self.options.ignore_file_override.clone(),
                    });
                }
                Err(err) => {
                    if self.gate.mode() == SecurityMode::Strict {
                        return Err(OxError::CollectLineFailed {
                            filelist: list_path,
                            line: line_no,
                            message: err.to_string(),
                        });
                    }
                    warn!(
                        filelist = %list_path.display(),
                        line = line_no,
                        "skipping collection entry: {err}"
                    );
                }
            }
        }

        debug!(
            filelist = %list_path.display(),
            count = specs.len(),
            "expanded collection"
        );
        Ok(specs)
    }
}

struct ParsedOperand {
    targets: BTreeSet<Target>,
    alias: Option<String>,
    path: String,
}

/// Split `[targets:][alias=]path`. A `targets:` prefix is only recognised
/// when every comma-separated element is a known target name, so Windows
/// drive prefixes and URLs in paths stay intact.
fn parse_operand(value: &str) -> Result<ParsedOperand> {
    let mut rest = value;
    let mut targets: BTreeSet<Target> = BTreeSet::new();

    if let Some((head, tail)) = rest.split_once(':') {
        let parsed: Option<Vec<Target>> = head
            .split(',')
            .map(|part| Target::parse(part.trim()).ok())
            .collect();
        if let Some(list) = parsed {
            if !list.is_empty() {
                targets.extend(list);
                rest = tail;
            }
        }
    }

    if targets.is_empty() {
        targets.insert(Target::Template);
    }

    let (alias, path) = match rest.split_once('=') {
        Some((alias, path)) if !alias.is_empty() && !path.is_empty() => {
            (Some(alias.to_string()), path.to_string())
        }
        _ => (None, rest.to_string()),
    };

    if path.is_empty() {
        return Err(OxError::Usage(format!("empty path in attachment '{value}'")));
    }

    Ok(ParsedOperand { targets, alias, path })
}
