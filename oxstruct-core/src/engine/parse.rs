//! Response content parsing.
//!
//! The parse chain is deterministic: a fenced ```json block first (capturing
//! any trailing markdown), then a whole-string parse, and — only when a code
//! executor was in the tool bundle — a bracket-balanced scan for the first
//! complete top-level object. The last step works around a provider quirk
//! where code-interpreter output leaks past the structured answer; a
//! balanced scan is used instead of a shortest-match regex so nested objects
//! survive.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::{OxError, Result};

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```")
        .unwrap_or_else(|e| panic!("fenced-json pattern: {e}"))
});

/// Split a response into its JSON object and the surrounding markdown, using
/// the first fenced block.
pub fn split_fenced_json(content: &str) -> Option<(Value, String)> {
    let captures = FENCED_JSON.captures(content)?;
    let body = captures.get(1)?;
    let value: Value = serde_json::from_str(body.as_str()).ok()?;
    if !value.is_object() {
        return None;
    }
    let whole = captures.get(0)?;
    let mut markdown = String::new();
    markdown.push_str(content[..whole.start()].trim());
    let tail = content[whole.end()..].trim();
    if !tail.is_empty() {
        if !markdown.is_empty() {
            markdown.push('\n');
        }
        markdown.push_str(tail);
    }
    Some((value, markdown))
}

/// Scan for the first complete top-level JSON object, honouring strings and
/// escapes.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse response text into `(object, markdown_tail)` using the full chain.
pub fn parse_response_content(content: &str, code_exec_active: bool) -> Result<(Value, String)> {
    if let Some(parsed) = split_fenced_json(content) {
        return Ok(parsed);
    }

    match serde_json::from_str::<Value>(content.trim()) {
        Ok(value) if value.is_object() => return Ok((value, String::new())),
        Ok(_) | Err(_) => {}
    }

    if code_exec_active {
        if let Some(candidate) = extract_first_json_object(content) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    warn!(
                        "extra content around the structured answer; recovered the JSON object \
                         (known quirk when code execution and structured output are combined)"
                    );
                    return Ok((value, String::new()));
                }
            }
        }
    }

    Err(OxError::Internal(anyhow::anyhow!(
        "response is not valid JSON: {}",
        content.chars().take(200).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn fenced_json_with_markdown_tail() {
        let content = "Here you go:\n```json\n{\"k\": 1}\n```\nSome analysis.";
        let (value, markdown) = split_fenced_json(content).unwrap();
        assert_eq!(value, json!({"k": 1}));
        assert!(markdown.contains("Here you go:"));
        assert!(markdown.contains("Some analysis."));
    }

    #[test]
    fn whole_string_parse() {
        let (value, markdown) =
            parse_response_content("  {\"answer\": \"x\"}  ", false).unwrap();
        assert_eq!(value, json!({"answer": "x"}));
        assert_eq!(markdown, "");
    }

    #[test]
    fn defensive_scan_only_with_code_exec() {
        let content = "{\"a\": {\"nested\": 1}} and then the tool printed this";
        // Without code exec in the bundle the chain fails.
        assert!(parse_response_content(content, false).is_err());
        // With it, the balanced scanner recovers the full nested object.
        let (value, _) = parse_response_content(content, true).unwrap();
        assert_eq!(value, json!({"a": {"nested": 1}}));
    }

    #[test]
    fn balanced_scanner_handles_nested_objects() {
        let text = "noise {\"outer\": {\"inner\": {\"deep\": true}}, \"b\": 2} trailing";
        let extracted = extract_first_json_object(text).unwrap();
        let value: Value = serde_json::from_str(extracted).unwrap();
        assert_eq!(value["outer"]["inner"]["deep"], json!(true));
        assert_eq!(value["b"], json!(2));
    }

    #[test]
    fn balanced_scanner_ignores_braces_in_strings() {
        let text = r#"{"text": "has a } brace and a \" quote", "n": 1} extra"#;
        let extracted = extract_first_json_object(text).unwrap();
        let value: Value = serde_json::from_str(extracted).unwrap();
        assert_eq!(value["n"], json!(1));
    }

    #[test]
    fn balanced_scanner_rejects_unclosed() {
        assert_eq!(extract_first_json_object("{\"open\": "), None);
        assert_eq!(extract_first_json_object("no braces"), None);
    }

    #[test]
    fn parse_is_deterministic() {
        let content = "prefix ```json\n{\"k\": [1, 2, 3]}\n``` suffix";
        let first = parse_response_content(content, true).unwrap();
        for _ in 0..5 {
            assert_eq!(parse_response_content(content, true).unwrap(), first);
        }
    }

    #[test]
    fn top_level_array_is_not_accepted() {
        assert!(parse_response_content("[1, 2, 3]", false).is_err());
    }
}
