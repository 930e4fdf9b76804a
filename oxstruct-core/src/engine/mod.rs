//! Execution engine.
//!
//! Drives a single run: strictify and validate the schema, admit sampling
//! parameters, enforce the token budget before any upload, assemble the tool
//! bundle, send the structured-output request (single-pass or the two-pass
//! sentinel protocol), validate the response against the schema, and
//! guarantee cleanup of every remote object the run created.

pub mod params;
pub mod parse;
pub mod schema;
pub mod sentinel;

use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::types::{ApiResponse, ResponsesRequest, TextFormat};
use crate::api::ApiClient;
use crate::attach::plan::{RoutingPlan, ToolKind};
use crate::budget::TokenBudget;
use crate::engine::params::{admit_params, capabilities_for, web_search_tool, SamplingParams};
use crate::error::{ApiErrorKind, OxError, Result};
use crate::safeguards::UnattendedGuard;
use crate::services::ServiceContainer;
use crate::tools::code_exec::DownloadStrategy;
use crate::tools::ToolDriver;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub model: String,
    pub schema: Value,
    pub schema_name: String,
    pub params: SamplingParams,
    pub web_search: bool,
    /// The endpoint is Azure-hosted; guards the web-search tool.
    pub azure_endpoint: bool,
    /// Override of the configured download strategy (feature flag).
    pub strategy_override: Option<DownloadStrategy>,
    /// Delete remote objects after a successful run.
    pub cleanup_on_success: bool,
    /// Context window override; defaults to the model capability table.
    pub context_limit: Option<usize>,
}

/// The validated result of a run, with the raw material kept alongside for
/// downstream annotation processing.
#[derive(Debug)]
pub struct RunOutcome {
    pub value: Value,
    pub raw_text: String,
    pub markdown_text: String,
    pub downloaded_files: Vec<PathBuf>,
    pub prompt_tokens: usize,
}

/// Dry-run report: everything validated, nothing sent.
#[derive(Debug)]
pub struct DryRunReport {
    pub prompt_tokens: usize,
    pub context_limit: usize,
    pub enabled_tools: Vec<&'static str>,
    pub strict_schema: Value,
}

pub struct ExecutionEngine {
    client: ApiClient,
    services: ServiceContainer,
    guard: UnattendedGuard,
    options: EngineOptions,
}

impl ExecutionEngine {
    pub fn new(
        client: ApiClient,
        services: ServiceContainer,
        guard: UnattendedGuard,
        options: EngineOptions,
    ) -> Self {
        Self {
            client,
            services,
            guard,
            options,
        }
    }

    /// Execute the run under the unattended deadline. Cleanup happens on
    /// every path: here on success/failure, in the guard on timeout.
    pub async fn execute(
        &self,
        plan: &RoutingPlan,
        system_prompt: &str,
        user_prompt: &str,
        template_files: &[PathBuf],
    ) -> Result<RunOutcome> {
        let ledger = self.services.ledger();
        let result = self
            .guard
            .execute(
                self.run_inner(plan, system_prompt, user_prompt, template_files),
                &ledger,
                &self.client,
            )
            .await;

        if result.is_err() || self.options.cleanup_on_success {
            ledger.drain(&self.client).await;
        } else {
            debug!("cleanup disabled; keeping remote objects");
        }
        result
    }

    /// Run all validations, token budgeting, and plan assembly without a
    /// single remote call.
    pub async fn validate_only(
        &self,
        plan: &RoutingPlan,
        system_prompt: &str,
        user_prompt: &str,
        template_files: &[PathBuf],
    ) -> Result<DryRunReport> {
        let format = schema::prepare_strict_format(&self.options.schema_name, &self.options.schema)?;

        let caps = capabilities_for(&self.options.model);
        let mut probe = ResponsesRequest::new(&self.options.model, "");
        admit_params(&mut probe, &self.options.params, &caps)?;

        let context_limit = self.options.context_limit.unwrap_or(caps.context_window);
        let budget = TokenBudget::for_model(&self.options.model, context_limit)?;
        let rendered = format!("{system_prompt}\n\n{user_prompt}");
        let prompt_tokens = budget.validate(&rendered, template_files)?;

        Ok(DryRunReport {
            prompt_tokens,
            context_limit,
            enabled_tools: plan.enabled_tools.iter().map(|t| t.name()).collect(),
            strict_schema: format.schema,
        })
    }

    async fn run_inner(
        &self,
        plan: &RoutingPlan,
        system_prompt: &str,
        user_prompt: &str,
        template_files: &[PathBuf],
    ) -> Result<RunOutcome> {
        // E1: schema.
        let format = schema::prepare_strict_format(&self.options.schema_name, &self.options.schema)?;

        // E2: parameters.
        let caps = capabilities_for(&self.options.model);

        // Token gate runs before any upload.
        let context_limit = self.options.context_limit.unwrap_or(caps.context_window);
        let budget = TokenBudget::for_model(&self.options.model, context_limit)?;
        let rendered = format!("{system_prompt}\n\n{user_prompt}");
        let prompt_tokens = budget.validate(&rendered, template_files)?;
        debug!(prompt_tokens, context_limit, "token budget approved");

        // Policy closure: remote endpoints are screened before anything is
        // uploaded or sent.
        let mut tools: Vec<Value> = Vec::new();
        if self.services.has_endpoints() {
            let adapter = self.services.remote().await?;
            let endpoint_tools = adapter.tool_configs();
            self.guard.validate_tool_configs(&endpoint_tools)?;
            tools.extend(endpoint_tools);
        }

        // E3: tool bundle. Driver preparation uploads files as needed.
        let code_exec_active = plan.tool_enabled(ToolKind::CodeExec);
        self.services.uploads().register(plan).await?;

        if code_exec_active {
            let driver = self.services.code_exec().await;
            tools.push(driver.prepare().await?);
        }
        if plan.tool_enabled(ToolKind::Retrieval) {
            let driver = self.services.retrieval().await;
            tools.push(driver.prepare().await?);
        }
        if self.options.web_search && plan.tool_enabled(ToolKind::WebSearch) {
            if let Some(tool) = web_search_tool(&caps, self.options.azure_endpoint) {
                tools.push(tool);
            }
        }
        self.guard.validate_tool_configs(&tools)?;

        // E4/E5: request dispatch.
        let two_pass = code_exec_active
            && match self.options.strategy_override {
                Some(strategy) => strategy == DownloadStrategy::TwoPassSentinel,
                None => {
                    self.services.code_exec().await.config().download_strategy
                        == DownloadStrategy::TwoPassSentinel
                }
            };

        let outcome = if two_pass {
            info!("using two-pass sentinel mode for code-executor artifact recovery");
            self.run_two_pass(plan, system_prompt, user_prompt, &format, &tools, prompt_tokens)
                .await?
        } else {
            self.run_single_pass(plan, system_prompt, user_prompt, &format, &tools, prompt_tokens)
                .await?
        };

        Ok(outcome)
    }

    async fn run_single_pass(
        &self,
        plan: &RoutingPlan,
        system_prompt: &str,
        user_prompt: &str,
        format: &crate::api::types::JsonSchemaFormat,
        tools: &[Value],
        prompt_tokens: usize,
    ) -> Result<RunOutcome> {
        let code_exec_active = plan.tool_enabled(ToolKind::CodeExec);
        let mut request = ResponsesRequest::new(
            &self.options.model,
            format!("{system_prompt}\n\n{user_prompt}"),
        );
        request.text = Some(TextFormat {
            format: format.clone(),
        });
        request.tools = tools.to_vec();
        admit_params(
            &mut request,
            &self.options.params,
            &capabilities_for(&self.options.model),
        )?;

        let response = self.client.create_response(&request).await?;
        let content = response_text(&response);
        let (value, markdown) = parse::parse_response_content(&content, code_exec_active)?;
        self.validate_against_schema(&format.schema, &value)?;

        // Post-hoc artifact extraction: strict mode usually suppresses the
        // annotations, but recover whatever survived.
        let downloaded_files = if code_exec_active {
            self.services
                .code_exec()
                .await
                .download_generated_files(&response)
                .await?
        } else {
            Vec::new()
        };

        Ok(RunOutcome {
            value,
            raw_text: content,
            markdown_text: markdown,
            downloaded_files,
            prompt_tokens,
        })
    }

    /// Two-pass sentinel protocol: pass 1 runs unconstrained so annotations
    /// survive, pass 2 re-asks under the strict schema with the pass-1
    /// payload pinned into the system prompt.
    async fn run_two_pass(
        &self,
        plan: &RoutingPlan,
        system_prompt: &str,
        user_prompt: &str,
        format: &crate::api::types::JsonSchemaFormat,
        tools: &[Value],
        prompt_tokens: usize,
    ) -> Result<RunOutcome> {
        // Pass 1 (raw): tools, no response-format constraint.
        let sentinel_system = format!("{system_prompt}\n\n{}", sentinel::sentinel_instruction());
        let mut raw_request = ResponsesRequest::new(
            &self.options.model,
            format!("{sentinel_system}\n\n{user_prompt}"),
        );
        raw_request.tools = tools.to_vec();
        admit_params(
            &mut raw_request,
            &self.options.params,
            &capabilities_for(&self.options.model),
        )?;

        let raw_response = self.client.create_response(&raw_request).await?;
        let raw_text = response_text(&raw_response);

        let Some(data) = sentinel::extract_json_block(&raw_text) else {
            warn!("no sentinel JSON in first pass, falling back to single-pass mode");
            return self
                .run_single_pass(plan, system_prompt, user_prompt, format, tools, prompt_tokens)
                .await;
        };

        // Artifacts come from the raw response, where citations survive.
        let downloaded_files = self
            .services
            .code_exec()
            .await
            .download_generated_files(&raw_response)
            .await?;
        if !downloaded_files.is_empty() {
            info!(count = downloaded_files.len(), "downloaded artifacts from first pass");
        }

        // Pass 2 (strict): schema on, tools off, payload pinned.
        let strict_system = format!(
            "{system_prompt}\n\nReuse ONLY these values; do not repeat external calls:\n{}",
            serde_json::to_string_pretty(&data)
                .map_err(|e| OxError::Internal(anyhow::anyhow!("serialize sentinel data: {e}")))?
        );
        let mut strict_request = ResponsesRequest::new(
            &self.options.model,
            format!("{strict_system}\n\n{user_prompt}"),
        );
        strict_request.text = Some(TextFormat {
            format: format.clone(),
        });
        admit_params(
            &mut strict_request,
            &self.options.params,
            &capabilities_for(&self.options.model),
        )?;

        let strict_response = self.client.create_response(&strict_request).await?;
        let content = response_text(&strict_response);
        // Pass 2 has no tools, but keep the defensive branch: the quirk has
        // been seen to leak through here as well.
        let (value, markdown) = parse::parse_response_content(&content, true)?;
        self.validate_against_schema(&format.schema, &value)?;

        Ok(RunOutcome {
            value,
            raw_text: content,
            markdown_text: markdown,
            downloaded_files,
            prompt_tokens,
        })
    }

    fn validate_against_schema(&self, schema: &Value, value: &Value) -> Result<()> {
        let validator = jsonschema::validator_for(schema).map_err(|e| OxError::SchemaInvalid {
            message: format!("schema failed to compile: {e}"),
            path: "<root>".to_string(),
            tips: vec![],
        })?;
        if let Err(error) = validator.validate(value) {
            return Err(OxError::Api {
                kind: ApiErrorKind::InvalidRequest,
                message: format!("response does not conform to the schema: {error}"),
                status: None,
            });
        }
        Ok(())
    }
}

/// Prefer the joined message text; fall back to `output_text`.
fn response_text(response: &ApiResponse) -> String {
    response.assistant_text()
}
