//! Trigger Manager: matches events against rules and runs their actions.

mod manager;
pub mod outcome;
mod regenerate;
pub mod rule;

use async_trait::async_trait;

use crate::error::Result;

pub use manager::{TriggerDeps, TriggerManager};
pub use outcome::{
    ActionOutcome, ProcessEventResult, RuleEvaluation, RuleOutcome, RuleStats, TriggerState,
    TriggerStats, TriggerTotals,
};
pub use rule::{Action, Condition, EventKind, LogLevel, PageTarget, TriggerEvent, TriggerRule};

/// Predicate behind a `custom` condition, registered by handler name.
#[async_trait]
pub trait CustomCondition: Send + Sync {
    async fn evaluate(&self, event: &TriggerEvent, params: &serde_json::Value) -> Result<bool>;
}

/// Behaviour behind a `custom` action, registered by handler name. Returns a
/// short description of what it did.
#[async_trait]
pub trait CustomAction: Send + Sync {
    async fn execute(&self, event: &TriggerEvent, params: &serde_json::Value) -> Result<String>;
}
