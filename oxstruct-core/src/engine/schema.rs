//! Schema loading, strict-mode transformation, and structural validation.
//!
//! Strict structured output requires every object type to carry
//! `additionalProperties: false` and the provider imposes structural limits
//! on nesting, property counts, and enum sizes. The transform only fills in a
//! missing `additionalProperties`; an explicit `true` is preserved and then
//! rejected by validation so the contradiction is surfaced, not papered over.

use std::path::Path;

use serde_json::Value;

use crate::api::types::JsonSchemaFormat;
use crate::error::{OxError, Result};

pub const MAX_NESTING_DEPTH: usize = 5;
pub const MAX_PROPERTIES: usize = 100;
pub const MAX_ENUM_VALUES: usize = 500;
pub const ENUM_CHAR_CHECK_THRESHOLD: usize = 250;
pub const MAX_ENUM_TOTAL_CHARS: usize = 7500;

/// Keywords the provider rejects per type in strict mode.
const DISALLOWED_BY_TYPE: &[(&str, &[&str])] = &[
    ("object", &["patternProperties", "unevaluatedProperties", "propertyNames"]),
    ("string", &["format"]),
    ("number", &["multipleOf"]),
    ("integer", &["multipleOf"]),
];

/// Load a schema document from disk. The file may hold a bare schema object
/// or a `{"schema": ...}` wrapper.
pub fn load_schema_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|_| OxError::NotFound {
        path: path.to_path_buf(),
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| OxError::SchemaInvalid {
        message: format!("schema file is not valid JSON: {e}"),
        path: "<root>".to_string(),
        tips: vec!["Check the schema file for syntax errors".to_string()],
    })?;

    match value {
        Value::Object(mut map) if map.contains_key("schema") => map
            .remove("schema")
            .filter(|inner| inner.is_object())
            .ok_or_else(|| OxError::SchemaInvalid {
                message: "\"schema\" wrapper does not contain an object".to_string(),
                path: "schema".to_string(),
                tips: vec![],
            }),
        other => Ok(other),
    }
}

/// Recursively add `additionalProperties: false` to every object type that
/// does not already declare it.
pub fn make_strict(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            let is_object_type = map.get("type").and_then(Value::as_str) == Some("object");
            if is_object_type && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for value in map.values_mut() {
                make_strict(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                make_strict(item);
            }
        }
        _ => {}
    }
}

/// Validate a strictified schema against the provider's structural limits.
pub fn validate_structure(schema: &Value) -> Result<()> {
    let root = schema.as_object().ok_or_else(|| OxError::SchemaInvalid {
        message: "schema must be a JSON object".to_string(),
        path: "<root>".to_string(),
        tips: vec![],
    })?;

    if root.get("type").and_then(Value::as_str) != Some("object") {
        return Err(OxError::SchemaInvalid {
            message: "root schema must be type 'object'".to_string(),
            path: "<root>".to_string(),
            tips: vec![
                "If you have an array, wrap it in an object property and mark it required"
                    .to_string(),
            ],
        });
    }

    if root.get("additionalProperties") != Some(&Value::Bool(false)) {
        return Err(OxError::SchemaInvalid {
            message: "root schema must set additionalProperties: false".to_string(),
            path: "<root>".to_string(),
            tips: vec![
                "Strict mode refuses objects that admit undeclared properties; remove the explicit 'additionalProperties: true'"
                    .to_string(),
            ],
        });
    }

    walk(schema, &mut Vec::new())
}

fn walk(schema: &Value, path: &mut Vec<String>) -> Result<()> {
    if path.len() > MAX_NESTING_DEPTH {
        return Err(OxError::SchemaInvalid {
            message: format!("schema exceeds maximum nesting depth of {MAX_NESTING_DEPTH}"),
            path: location(path),
            tips: vec!["Flatten the schema structure".to_string()],
        });
    }

    let Some(map) = schema.as_object() else {
        return Ok(());
    };

    let declared_type = map.get("type").and_then(Value::as_str);

    if declared_type == Some("object") {
        if let Some(properties) = map.get("properties").and_then(Value::as_object) {
            if properties.len() > MAX_PROPERTIES {
                return Err(OxError::SchemaInvalid {
                    message: format!(
                        "object has {} properties (max {MAX_PROPERTIES})",
                        properties.len()
                    ),
                    path: location(path),
                    tips: vec!["Split the object into nested structures".to_string()],
                });
            }
        }
        if map.get("additionalProperties") == Some(&Value::Bool(true)) {
            return Err(OxError::SchemaInvalid {
                message: "object sets additionalProperties: true, which strict mode rejects"
                    .to_string(),
                path: location(path),
                tips: vec!["Remove the explicit 'additionalProperties: true'".to_string()],
            });
        }
    }

    if let Some(values) = map.get("enum").and_then(Value::as_array) {
        if values.len() > MAX_ENUM_VALUES {
            return Err(OxError::SchemaInvalid {
                message: format!("enum has {} values (max {MAX_ENUM_VALUES})", values.len()),
                path: location(path),
                tips: vec!["Reduce the enum or use a plain string".to_string()],
            });
        }
        if values.len() > ENUM_CHAR_CHECK_THRESHOLD {
            let total_chars: usize = values
                .iter()
                .filter_map(Value::as_str)
                .map(str::len)
                .sum();
            if total_chars > MAX_ENUM_TOTAL_CHARS {
                return Err(OxError::SchemaInvalid {
                    message: format!(
                        "enum with {} values totals {total_chars} characters (max {MAX_ENUM_TOTAL_CHARS})",
                        values.len()
                    ),
                    path: location(path),
                    tips: vec!["Shorten the enum values".to_string()],
                });
            }
        }
    }

    if let Some(declared) = declared_type {
        for (type_name, keywords) in DISALLOWED_BY_TYPE {
            if *type_name == declared {
                for keyword in *keywords {
                    if map.contains_key(*keyword) {
                        return Err(OxError::SchemaInvalid {
                            message: format!(
                                "keyword '{keyword}' is not allowed on type '{declared}' in strict mode"
                            ),
                            path: location(path),
                            tips: vec![format!("Remove '{keyword}' or express the constraint in the prompt")],
                        });
                    }
                }
            }
        }
    }

    // Recurse along schema nesting only: property subschemas, array items,
    // composition branches, and definitions.
    if let Some(properties) = map.get("properties").and_then(Value::as_object) {
        for (name, subschema) in properties {
            path.push(name.clone());
            walk(subschema, path)?;
            path.pop();
        }
    }
    if let Some(items) = map.get("items") {
        path.push("[]".to_string());
        walk(items, path)?;
        path.pop();
    }
    for keyword in ["anyOf", "oneOf", "allOf"] {
        if let Some(branches) = map.get(keyword).and_then(Value::as_array) {
            for branch in branches {
                walk(branch, path)?;
            }
        }
    }
    for keyword in ["$defs", "definitions"] {
        if let Some(definitions) = map.get(keyword).and_then(Value::as_object) {
            for (name, definition) in definitions {
                path.push(name.clone());
                walk(definition, path)?;
                path.pop();
            }
        }
    }

    Ok(())
}

fn location(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join("/")
    }
}

/// Strictify, validate, and wrap a schema for the request.
pub fn prepare_strict_format(name: &str, schema: &Value) -> Result<JsonSchemaFormat> {
    let mut strict = schema.clone();
    make_strict(&mut strict);
    validate_structure(&strict)?;
    Ok(JsonSchemaFormat::new(name, strict))
}
