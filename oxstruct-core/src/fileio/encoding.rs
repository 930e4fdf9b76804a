//! Text encoding detection.
//!
//! Detection order: UTF-8 strict, BOM sniffing (UTF-8/16/32, both endians),
//! then a chardetng probe. Files that defeat all three are treated as opaque
//! bytes with an `unknown` encoding and no text content exposed.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};

/// Minimum confidence-equivalent: chardetng has no numeric score, so we
/// require the probe to decode without replacement characters exceeding this
/// fraction of the output.
const MAX_REPLACEMENT_RATIO: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedText {
    /// Decoded content; `None` when the bytes are not text.
    pub content: Option<String>,
    /// Label such as `utf-8`, `utf-16le`, `windows-1252`, or `unknown`.
    pub encoding: String,
}

impl DetectedText {
    fn opaque() -> Self {
        Self {
            content: None,
            encoding: "unknown".to_string(),
        }
    }
}

/// Detect and decode the given bytes.
pub fn detect(bytes: &[u8]) -> DetectedText {
    if bytes.is_empty() {
        return DetectedText {
            content: Some(String::new()),
            encoding: "utf-8".to_string(),
        };
    }

    // Fast path: valid UTF-8 (with or without BOM).
    if let Ok(text) = std::str::from_utf8(strip_utf8_bom(bytes)) {
        return DetectedText {
            content: Some(text.to_string()),
            encoding: "utf-8".to_string(),
        };
    }

    // BOM sniffing for the wide encodings. UTF-32 BOMs must be checked
    // before UTF-16 since a UTF-32 LE BOM starts with the UTF-16 LE BOM.
    if bytes.len() >= 4 && bytes[..4] == [0xFF, 0xFE, 0x00, 0x00] {
        return decode_utf32(&bytes[4..], true);
    }
    if bytes.len() >= 4 && bytes[..4] == [0x00, 0x00, 0xFE, 0xFF] {
        return decode_utf32(&bytes[4..], false);
    }
    if bytes.len() >= 2 && bytes[..2] == [0xFF, 0xFE] {
        return decode_with(UTF_16LE, bytes, "utf-16le");
    }
    if bytes.len() >= 2 && bytes[..2] == [0xFE, 0xFF] {
        return decode_with(UTF_16BE, bytes, "utf-16be");
    }

    // chardetng probe.
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors || replacement_ratio(&decoded) > MAX_REPLACEMENT_RATIO {
        return DetectedText::opaque();
    }
    DetectedText {
        content: Some(decoded.into_owned()),
        encoding: encoding.name().to_ascii_lowercase(),
    }
}

fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8], label: &str) -> DetectedText {
    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return DetectedText::opaque();
    }
    DetectedText {
        content: Some(decoded.into_owned()),
        encoding: label.to_string(),
    }
}

/// encoding_rs has no UTF-32 decoder; handle the BOM'd case manually.
fn decode_utf32(body: &[u8], little_endian: bool) -> DetectedText {
    if body.len() % 4 != 0 {
        return DetectedText::opaque();
    }
    let mut out = String::with_capacity(body.len() / 4);
    for chunk in body.chunks_exact(4) {
        let value = if little_endian {
            u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        } else {
            u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        };
        match char::from_u32(value) {
            Some(ch) => out.push(ch),
            None => return DetectedText::opaque(),
        }
    }
    DetectedText {
        content: Some(out),
        encoding: if little_endian { "utf-32le" } else { "utf-32be" }.to_string(),
    }
}

fn replacement_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let replacements = text.chars().filter(|c| *c == '\u{FFFD}').count();
    replacements as f64 / text.chars().count() as f64
}
