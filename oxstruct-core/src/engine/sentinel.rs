//! Sentinel-block extraction for the two-pass protocol.
//!
//! Pass 1 runs without a response-format constraint so tool annotations
//! survive; the model is instructed to wrap its JSON answer between
//! `===BEGIN_JSON===` and `===END_JSON===`. Extraction failure is not an
//! error — the engine falls back to single-pass mode.

use serde_json::Value;

use crate::engine::parse::extract_first_json_object;

pub const BEGIN_MARKER: &str = "===BEGIN_JSON===";
pub const END_MARKER: &str = "===END_JSON===";

/// System-prompt suffix instructing the model to emit the sentinel block.
pub fn sentinel_instruction() -> String {
    format!(
        "After using any tools, emit your final JSON answer between the markers \
         {BEGIN_MARKER} and {END_MARKER} on their own lines."
    )
}

/// Extract the JSON object between the sentinel markers. Returns `None` when
/// the markers are missing, out of order, or wrap malformed JSON.
pub fn extract_json_block(text: &str) -> Option<Value> {
    let begin = text.find(BEGIN_MARKER)?;
    let after_begin = begin + BEGIN_MARKER.len();
    let end_offset = text[after_begin..].find(END_MARKER)?;
    let between = &text[after_begin..after_begin + end_offset];

    let candidate = extract_first_json_object(between)?;
    let value: Value = serde_json::from_str(candidate).ok()?;
    value.is_object().then_some(value)
}
