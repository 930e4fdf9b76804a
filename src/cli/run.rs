//! `run` command: one-shot execution.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use oxstruct_core::api::ApiClient;
use oxstruct_core::attach::{
    AttachKind, AttachmentResolver, RawAttachment, ResolveOptions, RoutingPlan, ToolKind,
};
use oxstruct_core::cleanup::CleanupLedger;
use oxstruct_core::config::OxstructConfig;
use oxstruct_core::engine::params::SamplingParams;
use oxstruct_core::engine::schema::load_schema_file;
use oxstruct_core::engine::{EngineOptions, ExecutionEngine};
use oxstruct_core::error::{OxError, Result};
use oxstruct_core::fileio::cache::FileCache;
use oxstruct_core::safeguards::UnattendedGuard;
use oxstruct_core::security::PathGate;
use oxstruct_core::services::ServiceContainer;
use oxstruct_core::template::{parse_variables, TemplateContextBuilder};
use oxstruct_core::tools::code_exec::DownloadStrategy;
use oxstruct_core::tools::remote::{ApprovalMode, RemoteEndpoint};
use serde_json::Value;
use tracing::info;

use super::args::RunArgs;
use crate::render;

pub async fn handle(args: RunArgs) -> Result<()> {
    let mut config = OxstructConfig::load(args.config.as_deref())?;
    apply_cli_overrides(&mut config, &args)?;

    // Security gate.
    let base_dir = args
        .base_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into()));
    let mode = match &args.path_security {
        Some(mode) => mode.parse()?,
        None => config.security.mode()?,
    };
    let mut gate = PathGate::new(base_dir, mode);
    for dir in config.security.allowed_dirs.iter().chain(args.allow_dirs.iter()) {
        gate.allow_dir(dir);
    }
    if let Some(allow_file) = args.allow_file.as_ref().or(config.security.allow_file.as_ref()) {
        gate.allow_dirs_from_file(allow_file)?;
    }

    // Template and schema sources pass the gate first. With an inline
    // template, the sole positional holds the schema path.
    let (template_path, schema_arg) = if args.template_str.is_some() {
        let schema = args
            .schema
            .clone()
            .or_else(|| args.template.clone())
            .ok_or_else(|| OxError::Usage("no schema given".to_string()))?;
        (None, schema)
    } else {
        let schema = args
            .schema
            .clone()
            .ok_or_else(|| OxError::Usage("no schema given".to_string()))?;
        (args.template.clone(), schema)
    };

    let template_body = match (&args.template_str, &template_path) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => {
            let resolved = gate.resolve(path)?;
            std::fs::read_to_string(&resolved)
                .map_err(|e| OxError::Usage(format!("cannot read template {}: {e}", resolved.display())))?
        }
        (None, None) => return Err(OxError::Usage("no template given".to_string())),
    };
    let schema_path = gate.resolve(&schema_arg)?;
    let schema = load_schema_file(&schema_path)?;

    // Attachments.
    let resolve_options = ResolveOptions {
        recursive: args.recursive,
        glob: args.glob.clone(),
        ignore_ignore_file: args.ignore_gitignore,
        ignore_file_override: args
            .gitignore_file
            .clone()
            .or_else(|| config.files.ignore_file.clone()),
    };
    let resolver = AttachmentResolver::new(&gate, resolve_options);
    let raw = collect_raw_attachments(&args);
    let specs = resolver.resolve(&raw)?;
    let mut plan = RoutingPlan::build(specs)?;

    // Tool toggles: enable beats config, disable beats config, both beat
    // routing-implied enablement.
    let enable = parse_toolset(&args.enable_tools)?;
    let disable = parse_toolset(&args.disable_tools)?;
    plan.apply_toggles(&enable, &disable)?;

    // Endpoints.
    let endpoints = parse_endpoints(&args)?;
    if !endpoints.is_empty() {
        plan.enabled_tools.insert(ToolKind::RemoteTool);
    }

    // Template context and rendering.
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| config.model.default.clone());
    let web_search = plan.tool_enabled(ToolKind::WebSearch);
    let cache = FileCache::new(config.files.cache_bytes);
    let algorithm = config.files.algorithm()?;
    let variables = parse_variables(&args.vars, &args.json_vars)?;
    let context_builder =
        TemplateContextBuilder::new(&plan, &cache, algorithm, model.clone(), web_search);
    let (context, template_paths) = context_builder.build(variables)?;
    let user_prompt = render::render(&template_body, &context)?;
    let system_prompt = "You are a precise assistant that answers with JSON conforming to the provided schema.".to_string();

    // Services and engine.
    let api_key = if args.dry_run {
        config.api_key().unwrap_or_default()
    } else {
        config.api_key()?
    };
    let client = match &config.model.base_url {
        Some(base_url) => ApiClient::with_base_url(api_key, base_url.clone()),
        None => ApiClient::new(api_key),
    };
    let ledger = Arc::new(CleanupLedger::new());
    let mut tools_config = config.tools_config()?;
    tools_config.endpoints = endpoints;
    let services = ServiceContainer::new(client.clone(), ledger, algorithm, tools_config)?;

    let schema_name = schema_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase().replace('-', "_"))
        .unwrap_or_else(|| "result".to_string());

    let timeout = Duration::from_secs(args.timeout.unwrap_or(config.limits.timeout_secs));
    let guard = UnattendedGuard::new(timeout);

    let options_model = model.clone();
    let options = EngineOptions {
        model,
        schema,
        schema_name,
        params: sampling_params(&args),
        web_search,
        azure_endpoint: config.model.azure,
        strategy_override: feature_flag_strategy(&args)?,
        cleanup_on_success: !args.keep_files,
        context_limit: config.limits.context_window,
    };
    let engine = ExecutionEngine::new(client, services, guard, options);

    if args.dry_run {
        let report = engine
            .validate_only(&plan, &system_prompt, &user_prompt, &template_paths)
            .await?;
        let cost = oxstruct_core::cost::estimate(
            &options_model,
            report.prompt_tokens,
            args.max_output_tokens,
        );
        println!(
            "{}",
            serde_json::json!({
                "dry_run": true,
                "prompt_tokens": report.prompt_tokens,
                "context_limit": report.context_limit,
                "enabled_tools": report.enabled_tools,
                "estimated_cost_usd": cost.map(|c| c.total_usd()),
            })
        );
        return Ok(());
    }

    let outcome = engine
        .execute(&plan, &system_prompt, &user_prompt, &template_paths)
        .await?;

    if let Some(cost) =
        oxstruct_core::cost::estimate(&options_model, outcome.prompt_tokens, args.max_output_tokens)
    {
        tracing::debug!("estimated request cost: ${:.4}", cost.total_usd());
    }

    write_output(args.output_file.as_deref(), &outcome.value)?;
    for path in &outcome.downloaded_files {
        info!(path = %path.display(), "artifact downloaded");
    }
    Ok(())
}

fn collect_raw_attachments(args: &RunArgs) -> Vec<RawAttachment> {
    let mut raw = Vec::new();
    for value in &args.files {
        raw.push(RawAttachment {
            kind: AttachKind::File,
            value: value.clone(),
        });
    }
    for value in &args.files_code {
        raw.push(RawAttachment {
            kind: AttachKind::File,
            value: format!("ci:{value}"),
        });
    }
    for value in &args.files_search {
        raw.push(RawAttachment {
            kind: AttachKind::File,
            value: format!("fs:{value}"),
        });
    }
    for value in &args.dirs {
        raw.push(RawAttachment {
            kind: AttachKind::Dir,
            value: value.clone(),
        });
    }
    for value in &args.collects {
        raw.push(RawAttachment {
            kind: AttachKind::Collection,
            value: value.clone(),
        });
    }
    raw
}

fn parse_toolset(names: &[String]) -> Result<BTreeSet<ToolKind>> {
    names.iter().map(|name| ToolKind::parse(name)).collect()
}

fn parse_endpoints(args: &RunArgs) -> Result<Vec<RemoteEndpoint>> {
    if args.mcp_servers.is_empty() {
        return Ok(Vec::new());
    }
    let approval: ApprovalMode = args.mcp_approval.parse()?;

    let headers = args
        .mcp_headers
        .as_deref()
        .map(|raw| -> Result<serde_json::Map<String, Value>> {
            let value: Value = serde_json::from_str(raw)
                .map_err(|e| OxError::Usage(format!("--mcp-headers is not valid JSON: {e}")))?;
            value
                .as_object()
                .cloned()
                .ok_or_else(|| OxError::Usage("--mcp-headers must be a JSON object".to_string()))
        })
        .transpose()?;

    let mut allowed: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();
    for entry in &args.mcp_allowed {
        let (label, tools) = entry.split_once('=').ok_or_else(|| {
            OxError::Usage(format!("--mcp-allowed expects label=tool1,tool2, got '{entry}'"))
        })?;
        allowed.insert(
            label.to_string(),
            tools.split(',').map(|t| t.trim().to_string()).collect(),
        );
    }

    let shortcuts: std::collections::HashMap<String, String> =
        OxstructConfig::mcp_shortcuts().into_iter().collect();

    let mut endpoints = Vec::new();
    for operand in &args.mcp_servers {
        // A bare name with no URL refers to an OXSTRUCT_MCP_<NAME> shortcut.
        let operand = if operand.contains("://") {
            operand.clone()
        } else {
            let url = shortcuts.get(&operand.to_ascii_lowercase()).ok_or_else(|| {
                OxError::Usage(format!(
                    "unknown endpoint shortcut '{operand}' (set OXSTRUCT_MCP_{} or pass label@url)",
                    operand.to_ascii_uppercase()
                ))
            })?;
            format!("{operand}@{url}")
        };
        let mut endpoint = RemoteEndpoint::parse(&operand)?;
        endpoint.approval = approval;
        endpoint.allowed_tools = allowed.get(&endpoint.label).cloned();
        endpoint.headers = headers.clone();
        endpoint.validate()?;
        endpoints.push(endpoint);
    }
    Ok(endpoints)
}

fn sampling_params(args: &RunArgs) -> SamplingParams {
    SamplingParams {
        temperature: args.temperature,
        max_output_tokens: args.max_output_tokens,
        top_p: args.top_p,
        frequency_penalty: args.frequency_penalty,
        presence_penalty: args.presence_penalty,
        reasoning_effort: args.reasoning_effort.clone(),
    }
}

/// Feature flags: `ci-download-hack` with on/off overrides the configured
/// download strategy.
fn feature_flag_strategy(args: &RunArgs) -> Result<Option<DownloadStrategy>> {
    for flag in &args.enable_features {
        match flag.as_str() {
            "ci-download-hack" => return Ok(Some(DownloadStrategy::TwoPassSentinel)),
            other => {
                return Err(OxError::Usage(format!("unknown feature flag '{other}'")));
            }
        }
    }
    for flag in &args.disable_features {
        match flag.as_str() {
            "ci-download-hack" => return Ok(Some(DownloadStrategy::SinglePass)),
            other => {
                return Err(OxError::Usage(format!("unknown feature flag '{other}'")));
            }
        }
    }
    if let Some(strategy) = &args.ci_download_strategy {
        return Ok(Some(strategy.parse()?));
    }
    Ok(None)
}

fn apply_cli_overrides(config: &mut OxstructConfig, args: &RunArgs) -> Result<()> {
    if let Some(dir) = &args.ci_download_dir {
        config.tools.code_exec.download_dir = dir.clone();
    }
    if let Some(strategy) = &args.ci_duplicate_outputs {
        config.tools.code_exec.duplicate_outputs = strategy.clone();
    }
    if let Some(level) = &args.ci_validation {
        config.tools.code_exec.validation = level.clone();
    }
    if args.keep_files {
        config.tools.code_exec.cleanup = false;
        config.tools.retrieval.cleanup = false;
    }
    if let Some(name) = &args.fs_store_name {
        config.tools.retrieval.store_name = name.clone();
    }
    if let Some(retries) = args.fs_retries {
        config.tools.retrieval.max_retries = retries;
    }
    if let Some(timeout) = args.fs_timeout {
        config.tools.retrieval.index_timeout_secs = timeout;
    }
    Ok(())
}

fn write_output(output_file: Option<&Path>, value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| OxError::Internal(anyhow::anyhow!("serialize output: {e}")))?;
    match output_file {
        Some(path) => std::fs::write(path, rendered.as_bytes())
            .map_err(|e| OxError::Usage(format!("cannot write {}: {e}", path.display()))),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}
