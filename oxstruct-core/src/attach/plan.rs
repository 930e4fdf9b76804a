//! Routing planner.
//!
//! Converts resolved attachments into per-tool work lists plus the alias map
//! handed to the template layer. Routing implies tool enablement; CLI-level
//! toggles are applied on top (enable beats config, disable beats config,
//! both beat routing).

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use tracing::debug;

use crate::attach::spec::{AttachmentSpec, Target};
use crate::error::{OxError, Result};

/// Tools a run may drive. `Target` covers the routing subset; web search and
/// remote endpoints are enabled by flags/config only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolKind {
    CodeExec,
    Retrieval,
    WebSearch,
    RemoteTool,
}

impl ToolKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "code-exec" | "code-interpreter" | "ci" => Ok(ToolKind::CodeExec),
            "retrieval" | "file-search" | "fs" => Ok(ToolKind::Retrieval),
            "web-search" => Ok(ToolKind::WebSearch),
            "remote-tool" | "mcp" => Ok(ToolKind::RemoteTool),
            other => Err(OxError::Usage(format!(
                "unknown tool '{other}' (expected code-exec, retrieval, web-search, or remote-tool)"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::CodeExec => "code-exec",
            ToolKind::Retrieval => "retrieval",
            ToolKind::WebSearch => "web-search",
            ToolKind::RemoteTool => "remote-tool",
        }
    }
}

/// Per-tool work lists, alias map, and the enabled-tool set.
#[derive(Debug, Default)]
pub struct RoutingPlan {
    pub template_files: Vec<AttachmentSpec>,
    pub template_dirs: Vec<AttachmentSpec>,
    pub code_files: Vec<AttachmentSpec>,
    pub code_dirs: Vec<AttachmentSpec>,
    pub retrieval_files: Vec<AttachmentSpec>,
    pub retrieval_dirs: Vec<AttachmentSpec>,
    /// Alias -> spec, insertion order preserved separately in `alias_order`.
    pub alias_map: HashMap<String, AttachmentSpec>,
    pub alias_order: Vec<String>,
    pub enabled_tools: BTreeSet<ToolKind>,
}

impl RoutingPlan {
    /// Build the plan from resolved attachments. Order within each list
    /// follows CLI order; a multi-target attachment appears once per list.
    pub fn build(specs: Vec<AttachmentSpec>) -> Result<Self> {
        let mut plan = RoutingPlan::default();

        for spec in specs {
            if spec.targets.is_empty() {
                return Err(OxError::Usage(format!(
                    "attachment '{}' has no targets",
                    spec.alias
                )));
            }

            let is_dir = spec.is_dir();
            for target in &spec.targets {
                match (target, is_dir) {
                    (Target::Template, false) => plan.template_files.push(spec.clone()),
                    (Target::Template, true) => plan.template_dirs.push(spec.clone()),
                    (Target::CodeExec, false) => plan.code_files.push(spec.clone()),
                    (Target::CodeExec, true) => plan.code_dirs.push(spec.clone()),
                    (Target::Retrieval, false) => plan.retrieval_files.push(spec.clone()),
                    (Target::Retrieval, true) => plan.retrieval_dirs.push(spec.clone()),
                }
            }

            if spec.targets_tool(Target::CodeExec) {
                plan.enabled_tools.insert(ToolKind::CodeExec);
            }
            if spec.targets_tool(Target::Retrieval) {
                plan.enabled_tools.insert(ToolKind::Retrieval);
            }

            plan.alias_order.push(spec.alias.clone());
            plan.alias_map.insert(spec.alias.clone(), spec);
        }

        debug!(
            template = plan.template_files.len() + plan.template_dirs.len(),
            code_exec = plan.code_files.len() + plan.code_dirs.len(),
            retrieval = plan.retrieval_files.len() + plan.retrieval_dirs.len(),
            "routing plan built"
        );
        Ok(plan)
    }

    /// Apply CLI tool toggles. A tool named in both sets is a usage error.
    pub fn apply_toggles(
        &mut self,
        enable: &BTreeSet<ToolKind>,
        disable: &BTreeSet<ToolKind>,
    ) -> Result<()> {
        if let Some(conflict) = enable.intersection(disable).next() {
            return Err(OxError::Usage(format!(
                "tool '{}' is both enabled and disabled",
                conflict.name()
            )));
        }
        for tool in enable {
            self.enabled_tools.insert(*tool);
        }
        for tool in disable {
            self.enabled_tools.remove(tool);
        }
        Ok(())
    }

    pub fn tool_enabled(&self, tool: ToolKind) -> bool {
        self.enabled_tools.contains(&tool)
    }

    /// Specs feeding the named tool, files before directories.
    pub fn specs_for(&self, target: Target) -> Vec<&AttachmentSpec> {
        let (files, dirs) = match target {
            Target::Template => (&self.template_files, &self.template_dirs),
            Target::CodeExec => (&self.code_files, &self.code_dirs),
            Target::Retrieval => (&self.retrieval_files, &self.retrieval_dirs),
        };
        files.iter().chain(dirs.iter()).collect()
    }
}

/// Expand a directory attachment into its member files, honouring the spec's
/// recursion flag, glob filter, and ignore-file settings (gitignore
/// semantics via the `ignore` crate).
pub fn expand_directory(spec: &AttachmentSpec) -> Result<Vec<PathBuf>> {
    let pattern = spec
        .glob
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| OxError::Usage(format!("invalid glob pattern: {e}")))?;

    let mut builder = ignore::WalkBuilder::new(&spec.path);
    builder
        .standard_filters(false)
        .hidden(false)
        .git_ignore(!spec.ignore_ignore_file)
        .ignore(!spec.ignore_ignore_file)
        .require_git(false);
    if !spec.recursive {
        builder.max_depth(Some(1));
    }
    if let Some(override_file) = &spec.ignore_file_override {
        if let Some(err) = builder.add_ignore(override_file) {
            return Err(OxError::Usage(format!(
                "invalid ignore file {}: {err}",
                override_file.display()
            )));
        }
    }

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|e| OxError::Internal(anyhow::anyhow!("walk: {e}")))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Some(pattern) = &pattern {
            let name = entry.file_name().to_string_lossy();
            if !pattern.matches(&name) {
                continue;
            }
        }
        files.push(entry.into_path());
    }

    files.sort();
    Ok(files)
}
