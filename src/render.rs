//! Minimal template interpolation.
//!
//! Stand-in for the external rendering engine with the same context
//! contract: `{{ name }}` and `{{ name.field }}` placeholders resolve
//! against the context map, and unknown names or fields fail loudly at
//! render time. A bare file-handle reference renders its content.

use std::sync::LazyLock;

use oxstruct_core::error::{OxError, Result};
use regex::Regex;
use serde_json::{Map, Value};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}")
        .unwrap_or_else(|e| panic!("placeholder pattern: {e}"))
});

pub fn render(template: &str, context: &Map<String, Value>) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut cursor = 0;

    for captures in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let expr = &captures[1];
        output.push_str(&template[cursor..whole.start()]);
        output.push_str(&resolve(expr, context)?);
        cursor = whole.end();
    }
    output.push_str(&template[cursor..]);
    Ok(output)
}

fn resolve(expr: &str, context: &Map<String, Value>) -> Result<String> {
    let mut parts = expr.split('.');
    let name = parts.next().unwrap_or_default();
    let mut current = context
        .get(name)
        .ok_or_else(|| OxError::Usage(format!("template references unknown variable '{name}'")))?;

    for field in parts {
        current = current.get(field).ok_or_else(|| {
            OxError::Usage(format!(
                "template references unknown field '{field}' on '{name}'"
            ))
        })?;
    }

    Ok(match current {
        Value::String(text) => text.clone(),
        // A bare file handle renders its text content.
        Value::Object(map) if map.contains_key("content") => match map.get("content") {
            Some(Value::String(text)) => text.clone(),
            _ => {
                return Err(OxError::Usage(format!(
                    "'{expr}' is a binary file with no text content"
                )))
            }
        },
        other => other.to_string(),
    })
}
