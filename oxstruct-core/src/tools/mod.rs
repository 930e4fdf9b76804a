//! Tool drivers.
//!
//! Each remote tool kind implements the same small capability surface:
//! prepare (provision remote resources and emit the request tool config),
//! cleanup, and health reporting.

pub mod code_exec;
pub mod remote;
pub mod retrieval;

use async_trait::async_trait;
use serde_json::Value;

use crate::attach::plan::ToolKind;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    pub details: Vec<String>,
}

impl ServiceHealth {
    pub fn healthy() -> Self {
        Self {
            status: ServiceStatus::Healthy,
            details: Vec::new(),
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Degraded,
            details: vec![detail.into()],
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Unhealthy,
            details: vec![detail.into()],
        }
    }
}

/// Capability surface every tool driver implements.
#[async_trait]
pub trait ToolDriver: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// Provision remote resources (uploads, stores) and return the tool
    /// config to include in the request.
    async fn prepare(&self) -> Result<Value>;

    /// Best-effort teardown; never raises.
    async fn cleanup(&self);

    async fn health_check(&self) -> ServiceHealth;
}
