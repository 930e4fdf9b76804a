//! Configuration loading.
//!
//! Settings come from `oxstruct.toml` (working directory first, then the
//! user config directory) with environment-variable overrides on top; CLI
//! flags beat both and are applied by the binary. The API key itself is
//! environment-only and never appears in the config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{OxError, Result};
use crate::fileio::cache::DEFAULT_CACHE_BYTES;
use crate::fileio::identity::HashAlgorithm;
use crate::security::SecurityMode;
use crate::services::{ChunkSettings, ToolsConfig};
use crate::tools::code_exec::{CodeExecConfig, DownloadStrategy, DuplicateStrategy, ValidationLevel};
use crate::tools::retrieval::RetrievalConfig;

pub const CONFIG_FILE_NAME: &str = "oxstruct.toml";

pub mod env_vars {
    pub const API_KEY: &str = "OXSTRUCT_API_KEY";
    pub const BASE_URL: &str = "OXSTRUCT_BASE_URL";
    pub const CACHE_BYTES: &str = "OXSTRUCT_CACHE_BYTES";
    pub const HASH_ALGORITHM: &str = "OXSTRUCT_HASH_ALGORITHM";
    pub const TIMEOUT_SECS: &str = "OXSTRUCT_TIMEOUT_SECS";
    pub const IGNORE_FILE: &str = "OXSTRUCT_IGNORE_FILE";
    pub const DOWNLOAD_STRATEGY: &str = "OXSTRUCT_DOWNLOAD_STRATEGY";
    pub const MCP_PREFIX: &str = "OXSTRUCT_MCP_";
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct OxstructConfig {
    pub model: ModelSection,
    pub security: SecuritySection,
    pub files: FilesSection,
    pub tools: ToolsSection,
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSection {
    pub default: String,
    pub base_url: Option<String>,
    /// Set when the endpoint is Azure-hosted; gates the web-search tool.
    pub azure: bool,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            default: "gpt-4o".to_string(),
            base_url: None,
            azure: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SecuritySection {
    pub mode: Option<String>,
    pub allowed_dirs: Vec<PathBuf>,
    pub allow_file: Option<PathBuf>,
}

impl SecuritySection {
    pub fn mode(&self) -> Result<SecurityMode> {
        match &self.mode {
            Some(mode) => mode.parse(),
            None => Ok(SecurityMode::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesSection {
    pub cache_bytes: u64,
    pub hash_algorithm: String,
    pub ignore_file: Option<PathBuf>,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            cache_bytes: DEFAULT_CACHE_BYTES,
            hash_algorithm: "sha256".to_string(),
            ignore_file: None,
        }
    }
}

impl FilesSection {
    pub fn algorithm(&self) -> Result<HashAlgorithm> {
        self.hash_algorithm.parse()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsSection {
    pub code_exec: CodeExecSection,
    pub retrieval: RetrievalSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeExecSection {
    pub download_dir: PathBuf,
    pub cleanup: bool,
    pub duplicate_outputs: String,
    pub validation: String,
    pub download_strategy: String,
    pub extensions: Vec<String>,
}

impl Default for CodeExecSection {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            cleanup: true,
            duplicate_outputs: "overwrite".to_string(),
            validation: "basic".to_string(),
            download_strategy: "single_pass".to_string(),
            extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalSection {
    pub store_name: String,
    pub max_retries: u32,
    pub index_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub ttl_days: u32,
    pub cleanup: bool,
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        let chunking = ChunkSettings::default();
        Self {
            store_name: "oxstruct_store".to_string(),
            max_retries: 3,
            index_timeout_secs: 60,
            poll_interval_secs: 2,
            ttl_days: 7,
            cleanup: true,
            chunk_size_tokens: chunking.chunk_size_tokens,
            chunk_overlap_tokens: chunking.chunk_overlap_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsSection {
    pub context_window: Option<usize>,
    pub timeout_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            context_window: None,
            timeout_secs: 3600,
        }
    }
}

impl OxstructConfig {
    /// Load the config: explicit path, else `./oxstruct.toml`, else the user
    /// config directory, else defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::find_file(explicit)? {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| OxError::Usage(format!("cannot read {}: {e}", path.display())))?;
                toml::from_str(&content)
                    .map_err(|e| OxError::Usage(format!("invalid config {}: {e}", path.display())))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn find_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(OxError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            return Ok(Some(path.to_path_buf()));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(Some(local));
        }
        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("oxstruct").join(CONFIG_FILE_NAME);
            if user.exists() {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    /// Environment beats file values.
    fn apply_env(&mut self) {
        if let Ok(base_url) = std::env::var(env_vars::BASE_URL) {
            self.model.base_url = Some(base_url);
        }
        if let Ok(bytes) = std::env::var(env_vars::CACHE_BYTES) {
            if let Ok(parsed) = bytes.parse() {
                self.files.cache_bytes = parsed;
            }
        }
        if let Ok(algorithm) = std::env::var(env_vars::HASH_ALGORITHM) {
            self.files.hash_algorithm = algorithm;
        }
        if let Ok(secs) = std::env::var(env_vars::TIMEOUT_SECS) {
            if let Ok(parsed) = secs.parse() {
                self.limits.timeout_secs = parsed;
            }
        }
        if let Ok(ignore) = std::env::var(env_vars::IGNORE_FILE) {
            self.files.ignore_file = Some(PathBuf::from(ignore));
        }
        if let Ok(strategy) = std::env::var(env_vars::DOWNLOAD_STRATEGY) {
            self.tools.code_exec.download_strategy = strategy;
        }
    }

    /// Resolve the API key from the environment.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(env_vars::API_KEY).map_err(|_| {
            OxError::Usage(format!(
                "no API key: set the {} environment variable",
                env_vars::API_KEY
            ))
        })
    }

    /// Named MCP endpoint shortcuts from `OXSTRUCT_MCP_<NAME>=url`.
    pub fn mcp_shortcuts() -> Vec<(String, String)> {
        std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(env_vars::MCP_PREFIX)
                    .map(|name| (name.to_ascii_lowercase(), value))
            })
            .collect()
    }

    /// Build the driver-facing tools config.
    pub fn tools_config(&self) -> Result<ToolsConfig> {
        let code_exec = CodeExecConfig {
            download_dir: self.tools.code_exec.download_dir.clone(),
            cleanup: self.tools.code_exec.cleanup,
            duplicate_outputs: self.tools.code_exec.duplicate_outputs.parse::<DuplicateStrategy>()?,
            validation: self.tools.code_exec.validation.parse::<ValidationLevel>()?,
            download_strategy: self.tools.code_exec.download_strategy.parse::<DownloadStrategy>()?,
        };
        let retrieval = RetrievalConfig {
            store_name: self.tools.retrieval.store_name.clone(),
            max_retries: self.tools.retrieval.max_retries,
            retry_delay: Duration::from_secs(1),
            index_timeout: Duration::from_secs(self.tools.retrieval.index_timeout_secs),
            poll_interval: Duration::from_secs(self.tools.retrieval.poll_interval_secs),
            ttl_days: self.tools.retrieval.ttl_days,
            cleanup: self.tools.retrieval.cleanup,
        };
        Ok(ToolsConfig {
            code_exec,
            retrieval,
            chunking: ChunkSettings {
                chunk_size_tokens: self.tools.retrieval.chunk_size_tokens,
                chunk_overlap_tokens: self.tools.retrieval.chunk_overlap_tokens,
            },
            code_exec_extensions: self.tools.code_exec.extensions.clone(),
            endpoints: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OxstructConfig::default();
        assert_eq!(config.model.default, "gpt-4o");
        assert_eq!(config.files.cache_bytes, DEFAULT_CACHE_BYTES);
        assert_eq!(config.limits.timeout_secs, 3600);
        assert!(config.tools_config().is_ok());
    }

    #[test]
    fn parses_full_file() {
        let content = r#"
            [model]
            default = "o3"
            azure = true

            [security]
            mode = "strict"
            allowed_dirs = ["/data"]

            [files]
            cache_bytes = 1048576
            hash_algorithm = "sha1"

            [tools.code_exec]
            download_dir = "./artifacts"
            download_strategy = "two_pass_sentinel"
            duplicate_outputs = "rename"

            [tools.retrieval]
            store_name = "docs"
            ttl_days = 3

            [limits]
            context_window = 64000
            timeout_secs = 600
        "#;
        let config: OxstructConfig = toml::from_str(content).unwrap();
        assert_eq!(config.model.default, "o3");
        assert!(config.model.azure);
        assert_eq!(config.security.mode().unwrap(), SecurityMode::Strict);
        assert_eq!(config.files.algorithm().unwrap(), HashAlgorithm::Sha1);
        let tools = config.tools_config().unwrap();
        assert_eq!(tools.code_exec.download_strategy, DownloadStrategy::TwoPassSentinel);
        assert_eq!(tools.code_exec.duplicate_outputs, DuplicateStrategy::Rename);
        assert_eq!(tools.retrieval.store_name, "docs");
        assert_eq!(tools.retrieval.ttl_days, 3);
        assert_eq!(config.limits.context_window, Some(64_000));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let content = r#"
            [model]
            defualt = "typo"
        "#;
        assert!(toml::from_str::<OxstructConfig>(content).is_err());
    }

    #[test]
    fn bad_strategy_string_fails_conversion() {
        let mut config = OxstructConfig::default();
        config.tools.code_exec.download_strategy = "three_pass".to_string();
        assert!(config.tools_config().is_err());
    }
}
