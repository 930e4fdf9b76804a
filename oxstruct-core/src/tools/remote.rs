//! Remote tool endpoint adapter.
//!
//! User-configured tool endpoints (`label@url`) ride along in the request's
//! tool bundle. The run is unattended, so every endpoint must be configured
//! with approval mode `never`; anything else fails before the first remote
//! call. Outbound payloads are size-capped and screened for known-hostile
//! patterns, responses are recursively sanitised, and a per-endpoint token
//! bucket throttles request bursts.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::attach::plan::ToolKind;
use crate::error::{OxError, Result};
use crate::tools::{ServiceHealth, ToolDriver};

/// Outbound payload cap (10 KiB).
const MAX_PAYLOAD_BYTES: usize = 10 * 1024;

const BUCKET_CAPACITY: f64 = 10.0;
const BUCKET_REFILL_PER_SEC: f64 = 1.0;

static HOSTILE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\.\./",
        r"(?i)<\s*script",
        r"(?i)\$\{jndi:",
        r"(?i)\bdrop\s+table\b",
        r"(?i)file://",
        r"(?i)ftp://",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap_or_else(|e| panic!("bad pattern {pattern}: {e}")))
    .collect()
});

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<\s*script.*?(</\s*script\s*>|$)").unwrap_or_else(|e| panic!("{e}")));
static JS_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").unwrap_or_else(|e| panic!("{e}")));
static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bon\w+\s*=\s*("[^"]*"|'[^']*'|\S+)"#).unwrap_or_else(|e| panic!("{e}")));

/// Approval policy for a remote endpoint. Only `Never` is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalMode {
    #[default]
    Never,
    User,
    Always,
}

impl std::str::FromStr for ApprovalMode {
    type Err = OxError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "never" => Ok(ApprovalMode::Never),
            "user" => Ok(ApprovalMode::User),
            "always" => Ok(ApprovalMode::Always),
            other => Err(OxError::Usage(format!(
                "unknown approval mode '{other}' (expected never, user, or always)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub label: String,
    pub url: String,
    pub approval: ApprovalMode,
    pub allowed_tools: Option<Vec<String>>,
    pub headers: Option<Map<String, Value>>,
}

impl RemoteEndpoint {
    /// Parse a `label@url` operand; the label may be omitted, in which case
    /// it derives from the host name.
    pub fn parse(operand: &str) -> Result<Self> {
        let (label, url) = match operand.split_once('@') {
            Some((label, url)) if !label.is_empty() && !label.contains("://") => {
                (Some(label.to_string()), url.to_string())
            }
            _ => (None, operand.to_string()),
        };

        let parsed = Url::parse(&url)
            .map_err(|e| OxError::Usage(format!("invalid endpoint URL '{url}': {e}")))?;

        let label = label.unwrap_or_else(|| derive_label(&parsed));

        Ok(Self {
            label,
            url,
            approval: ApprovalMode::Never,
            allowed_tools: None,
            headers: None,
        })
    }

    /// Security validation of a single endpoint.
    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| OxError::Usage(format!("invalid endpoint URL '{}': {e}", self.url)))?;

        let loopback = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "::1" | "[::1]"));
        if parsed.scheme() != "https" && !loopback {
            return Err(OxError::Usage(format!(
                "endpoint '{}' must use https (got {})",
                self.label,
                parsed.scheme()
            )));
        }

        if self.approval != ApprovalMode::Never {
            return Err(OxError::PolicyViolation(format!(
                "endpoint '{}' requires approval; unattended operation demands approval mode 'never'",
                self.label
            )));
        }

        Ok(())
    }

    /// Per-endpoint descriptor for the request tool bundle.
    pub fn tool_config(&self) -> Value {
        let mut config = json!({
            "type": "mcp",
            "server_label": self.label,
            "server_url": self.url,
            "require_approval": "never",
        });
        if let Some(tools) = &self.allowed_tools {
            config["allowed_tools"] = json!(tools);
        }
        if let Some(headers) = &self.headers {
            config["headers"] = Value::Object(headers.clone());
        }
        config
    }
}

fn derive_label(url: &Url) -> String {
    let host = url.host_str().unwrap_or("remote");
    let stem = host
        .strip_prefix("www.")
        .unwrap_or(host)
        .split('.')
        .next()
        .unwrap_or("remote");
    stem.replace(|c: char| !c.is_ascii_alphanumeric(), "_")
}

/// Token bucket: 10 tokens, refilling one per second.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new() -> Self {
        Self {
            tokens: BUCKET_CAPACITY,
            last_refill: Instant::now(),
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * BUCKET_REFILL_PER_SEC).min(BUCKET_CAPACITY);
        self.last_refill = Instant::now();

        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new()
    }
}

/// Screen an outbound payload: size cap plus hostile-pattern rejection.
pub fn screen_payload(payload: &str) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(OxError::Usage(format!(
            "remote tool payload is {} bytes (max {MAX_PAYLOAD_BYTES})",
            payload.len()
        )));
    }
    for pattern in HOSTILE_PATTERNS.iter() {
        if pattern.is_match(payload) {
            return Err(OxError::Usage(
                "remote tool payload contains a blocked pattern".to_string(),
            ));
        }
    }
    Ok(())
}

/// Recursively sanitise a response value: strip script tags, javascript:
/// URLs, and inline event handlers from every string.
pub fn sanitize_response(value: Value) -> Value {
    match value {
        Value::String(text) => {
            let text = SCRIPT_TAG.replace_all(&text, "");
            let text = JS_SCHEME.replace_all(&text, "");
            let text = EVENT_HANDLER.replace_all(&text, "");
            Value::String(text.into_owned())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_response).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, sanitize_response(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Adapter over the configured endpoints. Validates them all up front and
/// contributes one tool descriptor per endpoint.
pub struct RemoteToolAdapter {
    endpoints: Vec<RemoteEndpoint>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RemoteToolAdapter {
    pub fn new(endpoints: Vec<RemoteEndpoint>) -> Result<Self> {
        for endpoint in &endpoints {
            endpoint.validate()?;
        }
        Ok(Self {
            endpoints,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    pub fn endpoints(&self) -> &[RemoteEndpoint] {
        &self.endpoints
    }

    pub fn tool_configs(&self) -> Vec<Value> {
        self.endpoints.iter().map(RemoteEndpoint::tool_config).collect()
    }

    /// Acquire a rate-limit token for the named endpoint.
    pub fn acquire(&self, label: &str) -> Result<()> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(label.to_string()).or_default();
        if bucket.try_acquire() {
            Ok(())
        } else {
            Err(OxError::Usage(format!(
                "rate limit exceeded for endpoint '{label}'"
            )))
        }
    }
}

#[async_trait]
impl ToolDriver for RemoteToolAdapter {
    fn kind(&self) -> ToolKind {
        ToolKind::RemoteTool
    }

    async fn prepare(&self) -> Result<Value> {
        debug!(endpoints = self.endpoints.len(), "remote tool adapter prepared");
        Ok(Value::Array(self.tool_configs()))
    }

    async fn cleanup(&self) {}

    async fn health_check(&self) -> ServiceHealth {
        if self.endpoints.is_empty() {
            ServiceHealth::degraded("no endpoints configured")
        } else if self.endpoints.iter().all(|e| e.validate().is_ok()) {
            ServiceHealth::healthy()
        } else {
            ServiceHealth::unhealthy("endpoint validation failed")
        }
    }
}
