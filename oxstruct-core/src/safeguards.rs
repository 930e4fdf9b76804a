//! Unattended-operation safeguards.
//!
//! The whole run executes under a configurable deadline, and tool
//! configurations are pre-validated so nothing in the bundle can stop and
//! wait for a human. On timeout the engine still gets a shielded cleanup
//! window so no remote objects survive a cancelled run.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::cleanup::CleanupLedger;
use crate::error::{OxError, Result};

/// Default whole-run deadline (1 hour).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Minimum cleanup window after a timeout or cancellation.
pub const MIN_CLEANUP_WINDOW: Duration = Duration::from_secs(30);

pub struct UnattendedGuard {
    timeout: Duration,
}

impl UnattendedGuard {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reject any tool configuration that would require human interaction.
    /// Runs before the first remote call.
    pub fn validate_tool_configs(&self, tools: &[Value]) -> Result<()> {
        for tool in tools {
            if let Some(approval) = tool.get("require_approval").and_then(Value::as_str) {
                if approval != "never" {
                    return Err(OxError::PolicyViolation(format!(
                        "tool '{}' requires approval mode '{approval}'; unattended runs demand 'never'",
                        tool.get("server_label")
                            .and_then(Value::as_str)
                            .unwrap_or("<unnamed>")
                    )));
                }
            }
            for forbidden in ["interactive", "user_prompts", "require_user_input"] {
                if tool.get(forbidden).and_then(Value::as_bool) == Some(true) {
                    return Err(OxError::PolicyViolation(format!(
                        "tool configuration enables '{forbidden}', which is incompatible with unattended operation"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run the operation under the deadline. On expiry the ledger is drained
    /// under its own shielded window, then OPERATION_TIMEOUT surfaces.
    pub async fn execute<F, T>(
        &self,
        operation: F,
        ledger: &CleanupLedger,
        client: &ApiClient,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let elapsed = started.elapsed();
                warn!(?elapsed, "operation deadline expired, draining cleanup ledger");
                let window = self
                    .timeout
                    .saturating_sub(elapsed)
                    .max(MIN_CLEANUP_WINDOW);
                if tokio::time::timeout(window, ledger.drain(client)).await.is_err() {
                    warn!("cleanup did not finish inside its shielded window");
                } else {
                    debug!("post-timeout cleanup complete");
                }
                Err(OxError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

impl Default for UnattendedGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
