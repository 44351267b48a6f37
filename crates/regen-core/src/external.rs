//! Interfaces to external collaborators.
//!
//! Upstream providers, the regeneration endpoint, notification delivery and
//! health probes are all outside this crate. Each sits behind a trait so the
//! pipeline can be wired against HTTP in production and scripted doubles in
//! tests.

use crate::aggregator::ContentGenerationContext;
use crate::error::Result;
use crate::types::{Mode, Severity, Tier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ---------------------------------------------------------------------------
// Upstream data
// ---------------------------------------------------------------------------

/// Tenant-wide guidance applied to every generated page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TenantInstructions {
    #[serde(default)]
    pub tone_rules: Vec<String>,
    #[serde(default)]
    pub forbidden_metrics: Vec<String>,
    #[serde(default)]
    pub personas: Vec<String>,
    #[serde(default)]
    pub maturity_rubric: BTreeMap<String, String>,
}

/// What an upstream fetch is being made for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchContext {
    pub page_id: String,
    pub tier: Tier,
    pub mode: Mode,
}

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    async fn fetch_instructions(&self) -> Result<TenantInstructions>;
    async fn fetch_agent_output(
        &self,
        agent_id: &str,
        ctx: &FetchContext,
    ) -> Result<serde_json::Value>;
    async fn fetch_tool_data(&self, tool_id: &str, ctx: &FetchContext)
        -> Result<serde_json::Value>;
}

// ---------------------------------------------------------------------------
// Regeneration endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationParams {
    pub page_id: String,
    pub tier: Tier,
    pub mode: Mode,
    pub context: ContentGenerationContext,
}

/// Provenance of the event that caused a regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMetadata {
    pub rule_id: String,
    pub event_id: String,
    pub event_type: String,
    pub source_id: String,
    pub event_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub event_metadata: serde_json::Map<String, serde_json::Value>,
}

/// Outcome reported by the regeneration endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Generated page body; required when `success` is true.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait Regenerator: Send + Sync {
    async fn run_regeneration(
        &self,
        workflow_id: &str,
        params: &RegenerationParams,
        trigger: &TriggerMetadata,
    ) -> Result<RunResult>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Delivers notifications into the tracing stream. Used when no external
/// delivery channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        let recipients = n.recipients.join(",");
        match n.severity {
            Severity::Info => {
                tracing::info!(%recipients, metadata = %n.metadata, "{}", n.message)
            }
            Severity::Warning | Severity::Critical => {
                tracing::warn!(%recipients, severity = %n.severity, metadata = %n.metadata, "{}", n.message)
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Health probes
// ---------------------------------------------------------------------------

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self, check: &str) -> bool;
}

/// Fixed health table. Unknown checks report unhealthy.
#[derive(Debug, Default, Clone)]
pub struct StaticHealth {
    checks: HashMap<String, bool>,
}

impl StaticHealth {
    pub fn new(checks: impl IntoIterator<Item = (String, bool)>) -> Self {
        Self {
            checks: checks.into_iter().collect(),
        }
    }
}

#[async_trait]
impl HealthProbe for StaticHealth {
    async fn is_healthy(&self, check: &str) -> bool {
        self.checks.get(check).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_health_defaults_unknown_to_unhealthy() {
        let health = StaticHealth::new([("db".to_string(), true), ("queue".to_string(), false)]);
        assert!(health.is_healthy("db").await);
        assert!(!health.is_healthy("queue").await);
        assert!(!health.is_healthy("unknown").await);
    }

    #[test]
    fn run_result_tolerates_sparse_payload() {
        let r: RunResult = serde_json::from_str(r#"{"success": false, "error": "boom"}"#).unwrap();
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(r.warnings.is_empty());
    }
}
