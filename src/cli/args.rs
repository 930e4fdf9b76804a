//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "oxstruct",
    version,
    about = "Run structured-output LLM jobs with multi-tool file routing"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// One-shot execution of a template + schema.
    Run(RunArgs),
    /// Execute a self-executing template file (OST front matter).
    Runx(RunxArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Template file path, then the JSON Schema file. With --template-str
    /// only the schema positional is given.
    #[arg(value_name = "TEMPLATE")]
    pub template: Option<PathBuf>,

    /// JSON Schema file (bare schema or {"schema": ...} wrapper).
    #[arg(value_name = "SCHEMA")]
    pub schema: Option<PathBuf>,

    /// Inline template string instead of a file.
    #[arg(long, value_name = "TEXT", conflicts_with = "schema")]
    pub template_str: Option<String>,

    /// Attach a file: [targets:][alias=]path (targets: prompt, ci, fs).
    #[arg(short = 'f', long = "file", value_name = "SPEC")]
    pub files: Vec<String>,

    /// Shorthand for --file ci:PATH.
    #[arg(long = "fc", value_name = "PATH")]
    pub files_code: Vec<String>,

    /// Shorthand for --file fs:PATH.
    #[arg(long = "fs", value_name = "PATH")]
    pub files_search: Vec<String>,

    /// Attach a directory: [targets:][alias=]path.
    #[arg(short = 'd', long = "dir", value_name = "SPEC")]
    pub dirs: Vec<String>,

    /// Attach a file collection: [targets:][alias=]@filelist.
    #[arg(short = 'c', long = "collect", value_name = "SPEC")]
    pub collects: Vec<String>,

    /// Recurse into attached directories.
    #[arg(long)]
    pub recursive: bool,

    /// Glob filter for directory attachments.
    #[arg(long, value_name = "PATTERN")]
    pub glob: Option<String>,

    /// Ignore gitignore files during directory expansion.
    #[arg(long)]
    pub ignore_gitignore: bool,

    /// Custom ignore file for directory expansion.
    #[arg(long, value_name = "PATH")]
    pub gitignore_file: Option<PathBuf>,

    /// String variable binding: name=value.
    #[arg(short = 'V', long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// JSON variable binding: name=json-literal.
    #[arg(short = 'J', long = "json-var", value_name = "NAME=JSON")]
    pub json_vars: Vec<String>,

    /// Model id.
    #[arg(short = 'm', long, value_name = "MODEL")]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub max_output_tokens: Option<u64>,

    #[arg(long)]
    pub top_p: Option<f64>,

    #[arg(long)]
    pub frequency_penalty: Option<f64>,

    #[arg(long)]
    pub presence_penalty: Option<f64>,

    /// Reasoning effort for o-series models (minimal, low, medium, high).
    #[arg(long, value_name = "EFFORT")]
    pub reasoning_effort: Option<String>,

    /// Enable a tool: code-exec, retrieval, web-search, remote-tool.
    #[arg(long = "enable-tool", value_name = "TOOL")]
    pub enable_tools: Vec<String>,

    /// Disable a tool.
    #[arg(long = "disable-tool", value_name = "TOOL")]
    pub disable_tools: Vec<String>,

    /// Remote tool endpoint: label@url.
    #[arg(long = "mcp-server", value_name = "LABEL@URL")]
    pub mcp_servers: Vec<String>,

    /// Restrict an endpoint's tools: label=tool1,tool2.
    #[arg(long = "mcp-allowed", value_name = "LABEL=TOOLS")]
    pub mcp_allowed: Vec<String>,

    /// Extra headers for endpoints, as a JSON object.
    #[arg(long = "mcp-headers", value_name = "JSON")]
    pub mcp_headers: Option<String>,

    /// Endpoint approval mode; unattended operation requires "never".
    #[arg(long = "mcp-approval", value_name = "MODE", default_value = "never")]
    pub mcp_approval: String,

    /// Artifact download directory.
    #[arg(long = "ci-download-dir", value_name = "DIR")]
    pub ci_download_dir: Option<PathBuf>,

    /// Duplicate-output strategy: overwrite, rename, skip.
    #[arg(long = "ci-duplicate-outputs", value_name = "STRATEGY")]
    pub ci_duplicate_outputs: Option<String>,

    /// Artifact validation level: off, basic, strict.
    #[arg(long = "ci-validation", value_name = "LEVEL")]
    pub ci_validation: Option<String>,

    /// Download strategy: single_pass, two_pass_sentinel.
    #[arg(long = "ci-download-strategy", value_name = "STRATEGY")]
    pub ci_download_strategy: Option<String>,

    /// Keep remote files and stores after the run.
    #[arg(long)]
    pub keep_files: bool,

    /// Vector store name.
    #[arg(long = "fs-store-name", value_name = "NAME")]
    pub fs_store_name: Option<String>,

    /// Retry count for vector store operations.
    #[arg(long = "fs-retries", value_name = "N")]
    pub fs_retries: Option<u32>,

    /// Indexing readiness timeout in seconds.
    #[arg(long = "fs-timeout", value_name = "SECS")]
    pub fs_timeout: Option<u64>,

    /// Write the JSON result here instead of stdout.
    #[arg(short = 'o', long = "output-file", value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Enable a feature flag (e.g. ci-download-hack).
    #[arg(long = "enable-feature", value_name = "FLAG")]
    pub enable_features: Vec<String>,

    /// Disable a feature flag.
    #[arg(long = "disable-feature", value_name = "FLAG")]
    pub disable_features: Vec<String>,

    /// Whole-run deadline in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Base directory for path security.
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Additional allowed directory (repeatable).
    #[arg(long = "allow", value_name = "DIR")]
    pub allow_dirs: Vec<PathBuf>,

    /// Newline-delimited file of allowed directories.
    #[arg(long = "allow-file", value_name = "PATH")]
    pub allow_file: Option<PathBuf>,

    /// Path security mode: permissive, warn, strict.
    #[arg(long = "path-security", value_name = "MODE")]
    pub path_security: Option<String>,

    /// Config file path.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Validate everything, estimate the budget, make no remote calls.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunxArgs {
    /// Self-executing template file with OST front matter.
    #[arg(value_name = "OST_FILE")]
    pub ost_file: PathBuf,

    /// Arguments forwarded to the embedded CLI contract.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
