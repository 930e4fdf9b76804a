//! Template context bridge.
//!
//! The rendering engine is an external collaborator; this module builds the
//! context it consumes: one entry per alias (a file handle, a list of
//! handles for collections/directories, or a directory listing), the flat
//! `files` list, run metadata, lazily read stdin, and the reserved
//! `_attachments` metadata map. Variable bindings (`name=value` and
//! `name=json-literal`) are parsed and checked here as well.

use std::collections::HashMap;
use std::io::Read;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::attach::plan::{expand_directory, RoutingPlan};
use crate::attach::spec::Target;
use crate::error::{OxError, Result};
use crate::fileio::cache::FileCache;
use crate::fileio::handle::FileHandle;
use crate::fileio::identity::HashAlgorithm;

const RESERVED_NAMES: &[&str] = &[
    "files",
    "file_count",
    "has_files",
    "current_model",
    "web_search_enabled",
    "stdin",
    "_attachments",
];

/// Validate a variable identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if head_ok && tail_ok {
        Ok(())
    } else {
        Err(OxError::Usage(format!(
            "invalid variable name '{name}': must match [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}

/// Parse `name=value` string bindings and `name=json` literal bindings into
/// one map, rejecting duplicates across both families.
pub fn parse_variables(string_vars: &[String], json_vars: &[String]) -> Result<Map<String, Value>> {
    let mut variables = Map::new();

    for binding in string_vars {
        let (name, value) = split_binding(binding)?;
        validate_identifier(name)?;
        if variables.contains_key(name) {
            return Err(OxError::VarDup(name.to_string()));
        }
        variables.insert(name.to_string(), Value::String(value.to_string()));
    }

    for binding in json_vars {
        let (name, literal) = split_binding(binding)?;
        validate_identifier(name)?;
        if variables.contains_key(name) {
            return Err(OxError::VarDup(name.to_string()));
        }
        let value: Value = serde_json::from_str(literal).map_err(|e| {
            OxError::Usage(format!("variable '{name}' is not valid JSON: {e}"))
        })?;
        variables.insert(name.to_string(), value);
    }

    Ok(variables)
}

fn split_binding(binding: &str) -> Result<(&str, &str)> {
    binding
        .split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| OxError::Usage(format!("expected name=value, got '{binding}'")))
}

pub struct TemplateContextBuilder<'a> {
    plan: &'a RoutingPlan,
    cache: &'a FileCache,
    algorithm: HashAlgorithm,
    model: String,
    web_search_enabled: bool,
}

impl<'a> TemplateContextBuilder<'a> {
    pub fn new(
        plan: &'a RoutingPlan,
        cache: &'a FileCache,
        algorithm: HashAlgorithm,
        model: impl Into<String>,
        web_search_enabled: bool,
    ) -> Self {
        Self {
            plan,
            cache,
            algorithm,
            model: model.into(),
            web_search_enabled,
        }
    }

    /// Build the renderer context. Returns the context map plus the list of
    /// template-routed file paths for token budgeting.
    pub fn build(&self, variables: Map<String, Value>) -> Result<(Map<String, Value>, Vec<std::path::PathBuf>)> {
        let mut context = Map::new();
        let mut all_handles: Vec<FileHandle> = Vec::new();
        let mut attachment_meta = Map::new();
        let mut template_paths = Vec::new();

        for alias in &self.plan.alias_order {
            let spec = self
                .plan
                .alias_map
                .get(alias)
                .ok_or_else(|| OxError::Internal(anyhow::anyhow!("alias '{alias}' missing from map")))?;

            let templated = spec.targets_tool(Target::Template);
            let entry = if spec.is_dir() {
                let mut handles = Vec::new();
                for file in expand_directory(spec)? {
                    let handle =
                        FileHandle::load(&file, &file, self.cache, self.algorithm)?;
                    if templated {
                        template_paths.push(file.clone());
                    }
                    handles.push(handle);
                }
                let values: Vec<Value> = handles.iter().map(FileHandle::to_context_value).collect();
                all_handles.extend(handles);
                Value::Array(values)
            } else {
                let handle =
                    FileHandle::load(&spec.path, &spec.path, self.cache, self.algorithm)?;
                if templated {
                    template_paths.push(spec.path.clone());
                }
                let value = handle.to_context_value();
                all_handles.push(handle);
                value
            };

            if RESERVED_NAMES.contains(&alias.as_str()) {
                return Err(OxError::Usage(format!(
                    "alias '{alias}' collides with a reserved context name"
                )));
            }
            context.insert(alias.clone(), entry);

            attachment_meta.insert(
                alias.clone(),
                json!({
                    "path": spec.path.display().to_string(),
                    "targets": spec.targets.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>(),
                    "from_collection": spec.from_collection,
                    "collection_alias": spec.collection_alias,
                }),
            );
        }

        let file_values: Vec<Value> = all_handles.iter().map(FileHandle::to_context_value).collect();
        context.insert("file_count".to_string(), json!(file_values.len()));
        context.insert("has_files".to_string(), json!(!file_values.is_empty()));
        context.insert("files".to_string(), Value::Array(file_values));
        context.insert("current_model".to_string(), json!(self.model));
        context.insert(
            "web_search_enabled".to_string(),
            json!(self.web_search_enabled),
        );
        context.insert("stdin".to_string(), read_stdin_lazy());
        context.insert("_attachments".to_string(), Value::Object(attachment_meta));

        // User variables fill remaining names; collisions with aliases fail.
        for (name, value) in variables {
            if context.contains_key(&name) {
                return Err(OxError::VarDup(name));
            }
            context.insert(name, value);
        }

        debug!(entries = context.len(), "template context built");
        Ok((context, template_paths))
    }
}

/// Read piped stdin when present; interactive terminals contribute null.
fn read_stdin_lazy() -> Value {
    use std::io::IsTerminal;
    if std::io::stdin().is_terminal() {
        return Value::Null;
    }
    let mut buffer = String::new();
    match std::io::stdin().read_to_string(&mut buffer) {
        Ok(_) => Value::String(buffer),
        Err(_) => Value::Null,
    }
}

/// Flatten a context map into a plain lookup for renderers that take string
/// keys only.
pub fn context_keys(context: &Map<String, Value>) -> HashMap<String, &Value> {
    context.iter().map(|(k, v)| (k.clone(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::spec::{AttachKind, AttachmentSpec};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn file_spec(alias: &str, path: std::path::PathBuf, targets: &[Target]) -> AttachmentSpec {
        AttachmentSpec {
            alias: alias.to_string(),
            path,
            targets: targets.iter().copied().collect::<BTreeSet<_>>(),
            kind: AttachKind::File,
            recursive: false,
            glob: None,
            from_collection: false,
            collection_alias: None,
            ignore_ignore_file: false,
            ignore_file_override: None,
        }
    }

    #[test]
    fn parses_string_and_json_variables() {
        let variables = parse_variables(
            &["name=world".to_string()],
            &["config={\"debug\": true}".to_string()],
        )
        .unwrap();
        assert_eq!(variables["name"], json!("world"));
        assert_eq!(variables["config"]["debug"], json!(true));
    }

    #[test]
    fn duplicate_variable_across_families_fails() {
        let err = parse_variables(
            &["x=1".to_string()],
            &["x=2".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, OxError::VarDup(name) if name == "x"));
    }

    #[test]
    fn bad_identifier_fails() {
        assert!(parse_variables(&["9lives=no".to_string()], &[]).is_err());
        assert!(parse_variables(&["has-dash=no".to_string()], &[]).is_err());
        assert!(parse_variables(&["=empty".to_string()], &[]).is_err());
    }

    #[test]
    fn context_exposes_aliases_and_metadata() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data.csv");
        std::fs::write(&data, "a,b\n").unwrap();

        let plan = RoutingPlan::build(vec![file_spec(
            "table",
            data,
            &[Target::Template, Target::CodeExec],
        )])
        .unwrap();
        let cache = FileCache::default();
        let builder =
            TemplateContextBuilder::new(&plan, &cache, HashAlgorithm::Sha256, "gpt-4o", true);

        let (context, template_paths) = builder.build(Map::new()).unwrap();
        assert_eq!(context["file_count"], json!(1));
        assert_eq!(context["has_files"], json!(true));
        assert_eq!(context["current_model"], json!("gpt-4o"));
        assert_eq!(context["web_search_enabled"], json!(true));
        assert_eq!(context["table"]["name"], json!("data.csv"));
        assert_eq!(context["_attachments"]["table"]["from_collection"], json!(false));
        assert_eq!(template_paths.len(), 1);
    }

    #[test]
    fn two_aliases_for_one_file_share_content() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data.csv");
        std::fs::write(&data, "a,b\n").unwrap();

        let plan = RoutingPlan::build(vec![
            file_spec("first", data.clone(), &[Target::Template]),
            file_spec("second", data, &[Target::Retrieval]),
        ])
        .unwrap();
        let cache = FileCache::default();
        let builder =
            TemplateContextBuilder::new(&plan, &cache, HashAlgorithm::Sha256, "gpt-4o", false);

        let (context, template_paths) = builder.build(Map::new()).unwrap();
        assert_eq!(context["first"]["hash"], context["second"]["hash"]);
        assert_eq!(context["file_count"], json!(2));
        // Only the template-routed alias feeds the token budget.
        assert_eq!(template_paths.len(), 1);
        // Content was read once; the second load hit the cache.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn variable_colliding_with_alias_fails() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("x.txt");
        std::fs::write(&data, "x").unwrap();

        let plan = RoutingPlan::build(vec![file_spec("x", data, &[Target::Template])]).unwrap();
        let cache = FileCache::default();
        let builder =
            TemplateContextBuilder::new(&plan, &cache, HashAlgorithm::Sha256, "gpt-4o", false);

        let mut variables = Map::new();
        variables.insert("x".to_string(), json!("collision"));
        assert!(matches!(
            builder.build(variables),
            Err(OxError::VarDup(name)) if name == "x"
        ));
    }

    #[test]
    fn reserved_alias_is_rejected() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("y.txt");
        std::fs::write(&data, "y").unwrap();

        let plan = RoutingPlan::build(vec![file_spec("files", data, &[Target::Template])]).unwrap();
        let cache = FileCache::default();
        let builder =
            TemplateContextBuilder::new(&plan, &cache, HashAlgorithm::Sha256, "gpt-4o", false);
        assert!(builder.build(Map::new()).is_err());
    }
}
