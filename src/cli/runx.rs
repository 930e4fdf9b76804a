//! `runx` command: execute a self-executing template (OST) file.
//!
//! The file carries YAML front matter between `---` markers declaring the
//! schema path, default model, variable defaults, and argument policy; the
//! body is the template. Full policy enforcement lives in the front-matter
//! layer; this command extracts the pieces, applies the unattended policy
//! check, and delegates to `run`.

use std::path::PathBuf;

use oxstruct_core::error::{OxError, Result};
use serde::Deserialize;

use super::args::{RunArgs, RunxArgs};

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct FrontMatter {
    schema: PathBuf,
    model: Option<String>,
    defaults: Option<serde_yaml::Mapping>,
    /// Policy: variables callers may override. Empty means all.
    allowed_vars: Option<Vec<String>>,
    timeout_secs: Option<u64>,
}

pub async fn handle(args: RunxArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.ost_file).map_err(|_| OxError::NotFound {
        path: args.ost_file.clone(),
    })?;
    let (front, body) = split_front_matter(&content)?;
    let front: FrontMatter = serde_yaml::from_str(front)
        .map_err(|e| OxError::Usage(format!("invalid OST front matter: {e}")))?;

    if front.schema.as_os_str().is_empty() {
        return Err(OxError::Usage(
            "OST front matter must declare a schema path".to_string(),
        ));
    }

    // Schema paths are relative to the OST file.
    let base = args
        .ost_file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let schema = if front.schema.is_absolute() {
        front.schema.clone()
    } else {
        base.join(&front.schema)
    };

    let mut run_args = RunArgs {
        schema: Some(schema),
        template_str: Some(body.to_string()),
        model: front.model.clone(),
        timeout: front.timeout_secs,
        base_dir: Some(base),
        ..RunArgs::default()
    };

    // Front-matter defaults first, then caller overrides subject to policy.
    if let Some(defaults) = &front.defaults {
        for (key, value) in defaults {
            let name = key
                .as_str()
                .ok_or_else(|| OxError::Usage("non-string variable name in defaults".to_string()))?;
            let rendered = match value {
                serde_yaml::Value::String(text) => text.clone(),
                other => serde_yaml::to_string(other)
                    .map_err(|e| OxError::Usage(format!("bad default for '{name}': {e}")))?
                    .trim_end()
                    .to_string(),
            };
            run_args.vars.push(format!("{name}={rendered}"));
        }
    }

    for override_arg in &args.args {
        let (name, _) = override_arg.split_once('=').ok_or_else(|| {
            OxError::Usage(format!("runx arguments must be name=value, got '{override_arg}'"))
        })?;
        if let Some(allowed) = &front.allowed_vars {
            if !allowed.iter().any(|entry| entry == name) {
                return Err(OxError::PolicyViolation(format!(
                    "variable '{name}' is not overridable in this template"
                )));
            }
        }
        // Overrides replace defaults of the same name.
        run_args.vars.retain(|existing| {
            existing.split_once('=').map(|(n, _)| n) != Some(name)
        });
        run_args.vars.push(override_arg.clone());
    }

    super::run::handle(run_args).await
}

/// Split `---\n<yaml>\n---\n<body>`.
fn split_front_matter(content: &str) -> Result<(&str, &str)> {
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| OxError::Usage("OST file must start with '---' front matter".to_string()))?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest
        .find("\n---")
        .ok_or_else(|| OxError::Usage("unterminated OST front matter".to_string()))?;
    let front = &rest[..end];
    let body = rest[end + 4..].strip_prefix('\n').unwrap_or(&rest[end + 4..]);
    Ok((front, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_front_matter_and_body() {
        let content = "---\nschema: out.json\nmodel: gpt-4o\n---\nHello {{ name }}\n";
        let (front, body) = split_front_matter(content).unwrap();
        assert!(front.contains("schema: out.json"));
        assert_eq!(body, "Hello {{ name }}\n");
    }

    #[test]
    fn missing_front_matter_is_usage_error() {
        assert!(split_front_matter("no front matter").is_err());
        assert!(split_front_matter("---\nunterminated").is_err());
    }

    #[test]
    fn front_matter_parses() {
        let front: FrontMatter = serde_yaml::from_str(
            "schema: schema.json\nmodel: o3\ndefaults:\n  region: eu\nallowed_vars: [region]\n",
        )
        .unwrap();
        assert_eq!(front.schema, PathBuf::from("schema.json"));
        assert_eq!(front.model.as_deref(), Some("o3"));
        assert!(front.allowed_vars.unwrap().contains(&"region".to_string()));
    }
}
