//! Rule and event data model.
//!
//! A `TriggerRule` pairs a match filter (event kinds × source ids) with an
//! ordered list of conditions, all of which must pass, and an ordered list of
//! actions to run when they do.

use crate::types::{Mode, Severity, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentCompletion,
    ToolDataUpdate,
    ManualTrigger,
    Schedule,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AgentCompletion => "agent_completion",
            EventKind::ToolDataUpdate => "tool_data_update",
            EventKind::ManualTrigger => "manual_trigger",
            EventKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TriggerEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub event_type: EventKind,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TriggerEvent {
    pub fn new(event_type: EventKind, source_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            source_id: source_id.into(),
            timestamp,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// `metadata.confidence` as a number, if present.
    pub fn confidence(&self) -> Option<f64> {
        self.metadata.get("confidence").and_then(|v| v.as_f64())
    }

    /// `"<event_type>:<source_id>"`, used as provenance on written content.
    pub fn provenance_tag(&self) -> String {
        format!("{}:{}", self.event_type, self.source_id)
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// `event.metadata.confidence >= min`.
    ConfidenceThreshold { min: f64 },
    /// `0 <= now - event.timestamp <= max_age_secs`, at full precision.
    DataFreshness { max_age_secs: u64 },
    /// The named health probe currently reports healthy.
    SystemHealth { check: String },
    /// A predicate registered on the manager under `handler`.
    Custom {
        handler: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl Condition {
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::ConfidenceThreshold { .. } => "confidence_threshold",
            Condition::DataFreshness { .. } => "data_freshness",
            Condition::SystemHealth { .. } => "system_health",
            Condition::Custom { .. } => "custom",
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTarget {
    pub page_id: String,
    #[serde(default)]
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    InvokeRegeneration {
        workflow_id: String,
        pages: Vec<PageTarget>,
        #[serde(default)]
        mode: Mode,
        /// Gate the write behind an approval for this phase.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approval_phase: Option<String>,
    },
    Notify {
        recipients: Vec<String>,
        message: String,
        #[serde(default)]
        severity: Severity,
    },
    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
    Custom {
        handler: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::InvokeRegeneration { .. } => "invoke_regeneration",
            Action::Notify { .. } => "notify",
            Action::Log { .. } => "log",
            Action::Custom { .. } => "custom",
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    pub name: String,
    pub event_types: Vec<EventKind>,
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl TriggerRule {
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        self.enabled
            && self.event_types.contains(&event.event_type)
            && self.source_ids.iter().any(|s| s == &event.source_id)
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_secs.map(Duration::from_secs)
    }
}
