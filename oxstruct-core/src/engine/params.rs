//! Model capability registry and sampling-parameter admission.
//!
//! Each parameter is checked against the target model's capability
//! descriptor: unsupported parameters are dropped with a warning,
//! out-of-range values fail the run.

use serde_json::Value;
use tracing::warn;

use crate::api::types::{ReasoningOptions, ResponsesRequest};
use crate::error::{OxError, Result};

#[derive(Debug, Clone)]
pub struct ModelCapabilities {
    pub context_window: usize,
    pub supports_sampling: bool,
    pub supports_reasoning_effort: bool,
    pub supports_structured_output: bool,
    pub supports_web_search: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            supports_sampling: true,
            supports_reasoning_effort: false,
            supports_structured_output: true,
            supports_web_search: true,
        }
    }
}

/// Static capability table keyed by model id prefix, most specific first.
const MODEL_TABLE: &[(&str, ModelEntry)] = &[
    ("gpt-4o-mini", ModelEntry { context: 128_000, sampling: true, reasoning: false, web: true }),
    ("gpt-4o", ModelEntry { context: 128_000, sampling: true, reasoning: false, web: true }),
    ("gpt-4.1-nano", ModelEntry { context: 1_047_576, sampling: true, reasoning: false, web: false }),
    ("gpt-4.1", ModelEntry { context: 1_047_576, sampling: true, reasoning: false, web: true }),
    ("o1", ModelEntry { context: 200_000, sampling: false, reasoning: true, web: false }),
    ("o3-mini", ModelEntry { context: 200_000, sampling: false, reasoning: true, web: false }),
    ("o3", ModelEntry { context: 200_000, sampling: false, reasoning: true, web: true }),
    ("o4-mini", ModelEntry { context: 200_000, sampling: false, reasoning: true, web: true }),
];

struct ModelEntry {
    context: usize,
    sampling: bool,
    reasoning: bool,
    web: bool,
}

/// Look up the capabilities of a model id. Unknown models get permissive
/// defaults and a warning.
pub fn capabilities_for(model: &str) -> ModelCapabilities {
    for (prefix, entry) in MODEL_TABLE {
        if model.starts_with(prefix) {
            return ModelCapabilities {
                context_window: entry.context,
                supports_sampling: entry.sampling,
                supports_reasoning_effort: entry.reasoning,
                supports_structured_output: true,
                supports_web_search: entry.web,
            };
        }
    }
    warn!(model, "unknown model id, assuming permissive defaults");
    ModelCapabilities::default()
}

#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub reasoning_effort: Option<String>,
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value < min || value > max {
        return Err(OxError::ParamInvalid {
            name: name.to_string(),
            message: format!("{value} is outside [{min}, {max}]"),
        });
    }
    Ok(())
}

/// Apply admitted parameters to a request, dropping what the model does not
/// support and failing on out-of-range values.
pub fn admit_params(
    request: &mut ResponsesRequest,
    params: &SamplingParams,
    caps: &ModelCapabilities,
) -> Result<()> {
    if let Some(temperature) = params.temperature {
        check_range("temperature", temperature, 0.0, 2.0)?;
        if caps.supports_sampling {
            request.temperature = Some(temperature);
        } else {
            warn!("model does not support 'temperature'; dropping it");
        }
    }

    if let Some(top_p) = params.top_p {
        check_range("top_p", top_p, 0.0, 1.0)?;
        if caps.supports_sampling {
            request.top_p = Some(top_p);
        } else {
            warn!("model does not support 'top_p'; dropping it");
        }
    }

    if let Some(frequency_penalty) = params.frequency_penalty {
        check_range("frequency_penalty", frequency_penalty, -2.0, 2.0)?;
        if caps.supports_sampling {
            request.frequency_penalty = Some(frequency_penalty);
        } else {
            warn!("model does not support 'frequency_penalty'; dropping it");
        }
    }

    if let Some(presence_penalty) = params.presence_penalty {
        check_range("presence_penalty", presence_penalty, -2.0, 2.0)?;
        if caps.supports_sampling {
            request.presence_penalty = Some(presence_penalty);
        } else {
            warn!("model does not support 'presence_penalty'; dropping it");
        }
    }

    if let Some(max_output_tokens) = params.max_output_tokens {
        if max_output_tokens == 0 {
            return Err(OxError::ParamInvalid {
                name: "max_output_tokens".to_string(),
                message: "must be positive".to_string(),
            });
        }
        request.max_output_tokens = Some(max_output_tokens);
    }

    if let Some(effort) = &params.reasoning_effort {
        if !matches!(effort.as_str(), "minimal" | "low" | "medium" | "high") {
            return Err(OxError::ParamInvalid {
                name: "reasoning_effort".to_string(),
                message: format!("'{effort}' is not one of minimal, low, medium, high"),
            });
        }
        if caps.supports_reasoning_effort {
            request.reasoning = Some(ReasoningOptions {
                effort: effort.clone(),
            });
        } else {
            warn!("model does not support 'reasoning_effort'; dropping it");
        }
    }

    Ok(())
}

/// Web-search tool config, guarded: the model must support it and the guard
/// excludes Azure-hosted endpoints where the combination is unreliable.
pub fn web_search_tool(caps: &ModelCapabilities, azure_endpoint: bool) -> Option<Value> {
    if !caps.supports_web_search {
        warn!("model does not support web search; skipping the tool");
        return None;
    }
    if azure_endpoint {
        warn!("web search on Azure-hosted endpoints is unreliable; skipping the tool");
        return None;
    }
    Some(serde_json::json!({"type": "web_search_preview"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_resolve() {
        let caps = capabilities_for("gpt-4o-2024-08-06");
        assert!(caps.supports_sampling);
        assert!(!caps.supports_reasoning_effort);
        assert_eq!(caps.context_window, 128_000);

        let caps = capabilities_for("o3-mini");
        assert!(!caps.supports_sampling);
        assert!(caps.supports_reasoning_effort);
    }

    #[test]
    fn unknown_model_gets_defaults() {
        let caps = capabilities_for("experimental-llm");
        assert_eq!(caps.context_window, 128_000);
        assert!(caps.supports_structured_output);
    }

    #[test]
    fn out_of_range_temperature_fails() {
        let mut request = ResponsesRequest::new("gpt-4o", "hi");
        let params = SamplingParams {
            temperature: Some(3.5),
            ..SamplingParams::default()
        };
        let err = admit_params(&mut request, &params, &capabilities_for("gpt-4o")).unwrap_err();
        assert!(matches!(err, OxError::ParamInvalid { name, .. } if name == "temperature"));
    }

    #[test]
    fn unsupported_param_is_dropped_not_fatal() {
        let mut request = ResponsesRequest::new("o3", "hi");
        let params = SamplingParams {
            temperature: Some(0.7),
            reasoning_effort: Some("high".to_string()),
            ..SamplingParams::default()
        };
        admit_params(&mut request, &params, &capabilities_for("o3")).unwrap();
        assert_eq!(request.temperature, None);
        assert_eq!(request.reasoning.as_ref().unwrap().effort, "high");
    }

    #[test]
    fn reasoning_effort_values_are_validated() {
        let mut request = ResponsesRequest::new("o3", "hi");
        let params = SamplingParams {
            reasoning_effort: Some("maximum".to_string()),
            ..SamplingParams::default()
        };
        assert!(admit_params(&mut request, &params, &capabilities_for("o3")).is_err());
    }

    #[test]
    fn web_search_guards() {
        let caps = capabilities_for("gpt-4o");
        assert!(web_search_tool(&caps, false).is_some());
        assert!(web_search_tool(&caps, true).is_none());
        let caps = capabilities_for("o1");
        assert!(web_search_tool(&caps, false).is_none());
    }
}
