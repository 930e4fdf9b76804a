//! Token budget validation.
//!
//! Counts tokens of the rendered prompt plus every template-routed file
//! against the model context window, before any upload happens. Oversize
//! files get concrete rerouting advice: tabular/code files toward the code
//! executor (`-fc`), documents toward retrieval (`-fs`).

use std::path::{Path, PathBuf};

use tiktoken_rs::CoreBPE;
use tracing::warn;

use crate::error::{OxError, RerouteSuggestion, Result};

/// Files above this token count are singled out in PROMPT_TOO_LARGE advice.
const OVERSIZE_FILE_TOKENS: usize = 5_000;

/// Fraction of the window at which a warning fires.
const WARN_RATIO: f64 = 0.9;

const DATA_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "json", "xlsx", "xls", "parquet", "sql", "db", "sqlite", "sqlite3", "pkl",
    "npy", "npz", "h5", "hdf5", "xml", "yaml", "yml",
];

// Plain .txt and .log files are deliberately absent: they suit either route.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "md", "rst", "tex", "html", "htm", "rtf", "odt", "epub",
];

const CODE_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "ts", "java", "go", "c", "cpp", "h", "hpp", "rb", "php", "sh", "swift",
    "kt", "scala", "pl", "lua",
];

pub struct TokenBudget {
    encoder: CoreBPE,
    context_limit: usize,
}

impl TokenBudget {
    /// Build a validator for the given model. gpt-4o and o-series models use
    /// the o200k encoding, everything else falls back to cl100k.
    pub fn for_model(model: &str, context_limit: usize) -> Result<Self> {
        let encoder = if model.starts_with("gpt-4o")
            || model.starts_with("gpt-4.1")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            tiktoken_rs::o200k_base()
        } else {
            tiktoken_rs::cl100k_base()
        }
        .map_err(|e| OxError::Internal(anyhow::anyhow!("load tokenizer: {e}")))?;

        Ok(Self {
            encoder,
            context_limit,
        })
    }

    pub fn count(&self, text: &str) -> usize {
        self.encoder.encode_with_special_tokens(text).len()
    }

    /// Token count for a file: encoder count for text, a size/4 estimate for
    /// binary content.
    pub fn count_file(&self, path: &Path) -> usize {
        match std::fs::read_to_string(path) {
            Ok(content) => self.count(&content),
            Err(_) => std::fs::metadata(path)
                .map(|m| (m.len() / 4) as usize)
                .unwrap_or(0),
        }
    }

    /// Validate the rendered prompt plus template-routed files. Exactly at
    /// the limit warns and proceeds; one token over fails with rerouting
    /// advice. Returns the total token count on success.
    pub fn validate(&self, rendered_prompt: &str, template_files: &[PathBuf]) -> Result<usize> {
        let mut total = self.count(rendered_prompt);
        let mut oversized: Vec<(PathBuf, usize)> = Vec::new();

        for path in template_files {
            let tokens = self.count_file(path);
            total += tokens;
            if tokens > OVERSIZE_FILE_TOKENS {
                oversized.push((path.clone(), tokens));
            }
        }

        if total as f64 > self.context_limit as f64 * WARN_RATIO {
            warn!(
                "prompt is {:.1}% of the {}-token window ({} tokens)",
                total as f64 / self.context_limit as f64 * 100.0,
                self.context_limit,
                total
            );
        }

        if total > self.context_limit {
            let suggestions = oversized
                .into_iter()
                .map(|(path, tokens)| {
                    let flags = recommended_flags(&path);
                    RerouteSuggestion { path, tokens, flags }
                })
                .collect();
            return Err(OxError::PromptTooLarge {
                total_tokens: total,
                limit: self.context_limit,
                suggestions,
            });
        }

        Ok(total)
    }
}

fn has_extension_in(path: &Path, set: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| set.contains(&e.as_str()))
}

/// Recommended reroute flags for an oversize file: `-fc` for tabular/code
/// material, `-fs` for documents, both otherwise.
fn recommended_flags(path: &Path) -> Vec<String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    if has_extension_in(path, DATA_EXTENSIONS) || has_extension_in(path, CODE_EXTENSIONS) {
        vec![format!("-fc {name}")]
    } else if has_extension_in(path, DOCUMENT_EXTENSIONS) {
        vec![format!("-fs {name}")]
    } else {
        vec![format!("-fc {name}"), format!("-fs {name}")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn budget(limit: usize) -> TokenBudget {
        TokenBudget::for_model("gpt-4o", limit).unwrap()
    }

    #[test]
    fn short_prompt_passes() {
        let total = budget(1000).validate("hello world", &[]).unwrap();
        assert!(total > 0 && total < 10);
    }

    #[test]
    fn exactly_at_limit_proceeds() {
        let b = budget(1000);
        let prompt = "word ".repeat(200);
        let exact = b.count(&prompt);
        let tight = TokenBudget::for_model("gpt-4o", exact).unwrap();
        assert_eq!(tight.validate(&prompt, &[]).unwrap(), exact);
    }

    #[test]
    fn one_token_over_fails() {
        let b = budget(1000);
        let prompt = "word ".repeat(200);
        let exact = b.count(&prompt);
        let tight = TokenBudget::for_model("gpt-4o", exact - 1).unwrap();
        let err = tight.validate(&prompt, &[]).unwrap_err();
        assert!(matches!(err, OxError::PromptTooLarge { .. }));
    }

    #[test]
    fn oversize_log_file_suggests_both_routes() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs.txt");
        // ~12k tokens of text against an 8k window.
        std::fs::write(&log, "token ".repeat(12_000)).unwrap();

        let err = budget(8_000).validate("analyze {{ logs }}", &[log]).unwrap_err();
        match err {
            OxError::PromptTooLarge { suggestions, limit, .. } => {
                assert_eq!(limit, 8_000);
                assert_eq!(suggestions.len(), 1);
                // Plain text suits either tool.
                assert_eq!(
                    suggestions[0].flags,
                    vec!["-fc logs.txt".to_string(), "-fs logs.txt".to_string()]
                );
            }
            other => panic!("expected PromptTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn csv_suggests_code_exec() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("data.csv");
        std::fs::write(&csv, "col\n".repeat(20_000)).unwrap();

        let err = budget(4_000).validate("", &[csv]).unwrap_err();
        match err {
            OxError::PromptTooLarge { suggestions, .. } => {
                assert_eq!(suggestions[0].flags, vec!["-fc data.csv".to_string()]);
            }
            other => panic!("expected PromptTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn unknown_extension_suggests_either() {
        assert_eq!(
            recommended_flags(Path::new("blob.weird")),
            vec!["-fc blob.weird".to_string(), "-fs blob.weird".to_string()]
        );
    }
}
