use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::AuditOperation;

// ---------------------------------------------------------------------------
// processEvent results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub index: usize,
    pub kind: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleOutcome {
    Fired { actions: Vec<ActionOutcome> },
    CoolingDown { remaining_secs: u64 },
    ConditionFailed {
        index: usize,
        condition: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
}

impl RuleEvaluation {
    pub fn fired(&self) -> bool {
        matches!(self.outcome, RuleOutcome::Fired { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEventResult {
    pub event_id: String,
    /// False when any action of any fired rule failed.
    pub success: bool,
    pub message: String,
    pub rules: Vec<RuleEvaluation>,
}

impl ProcessEventResult {
    pub fn rules_fired(&self) -> usize {
        self.rules.iter().filter(|r| r.fired()).count()
    }
}

/// What happened to one page inside an invoke-regeneration action.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PageOutcome {
    Written(AuditOperation),
    Previewed,
    AwaitingApproval(String),
    Failed(String),
}

impl PageOutcome {
    pub(crate) fn is_failure(&self) -> bool {
        matches!(self, PageOutcome::Failed(_))
    }

    pub(crate) fn describe(&self, page_id: &str) -> String {
        match self {
            PageOutcome::Written(op) => format!("{page_id}: {op}"),
            PageOutcome::Previewed => format!("{page_id}: previewed"),
            PageOutcome::AwaitingApproval(id) => format!("{page_id}: awaiting approval {id}"),
            PageOutcome::Failed(e) => format!("{page_id}: failed ({e})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats and persisted state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerTotals {
    pub events_processed: u64,
    pub events_unmatched: u64,
    pub rules_fired: u64,
    pub cooldown_skips: u64,
    pub condition_rejections: u64,
    pub action_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fire_count: u64,
}

/// Cooldown clocks and counters; can be saved and restored so separate
/// process runs share cooldown windows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerState {
    #[serde(default)]
    pub rules: BTreeMap<String, RuleState>,
    #[serde(default)]
    pub totals: TriggerTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule_id: String,
    pub name: String,
    pub enabled: bool,
    pub fire_count: u64,
    pub last_fired: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerStats {
    pub totals: TriggerTotals,
    pub rules: Vec<RuleStats>,
}
