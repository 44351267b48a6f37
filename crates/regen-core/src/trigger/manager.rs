use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::json;

use super::outcome::{
    ActionOutcome, ProcessEventResult, RuleEvaluation, RuleOutcome, RuleStats, TriggerState,
    TriggerStats,
};
use super::rule::{Action, Condition, LogLevel, TriggerEvent, TriggerRule};
use super::{CustomAction, CustomCondition};
use crate::aggregator::ContextAggregator;
use crate::approval::ApprovalGate;
use crate::clock::Clock;
use crate::error::{RegenError, Result};
use crate::external::{HealthProbe, Notification, Notifier, Regenerator};
use crate::ledger::Ledger;

/// Collaborators the manager drives. Built once per process.
#[derive(Clone)]
pub struct TriggerDeps {
    pub aggregator: Arc<ContextAggregator>,
    pub approvals: Arc<ApprovalGate>,
    pub ledger: Arc<Ledger>,
    pub regenerator: Arc<dyn Regenerator>,
    pub notifier: Arc<dyn Notifier>,
    pub health: Arc<dyn HealthProbe>,
    pub clock: Arc<dyn Clock>,
}

pub struct TriggerManager {
    rules: Vec<TriggerRule>,
    pub(super) deps: TriggerDeps,
    conditions: HashMap<String, Arc<dyn CustomCondition>>,
    actions: HashMap<String, Arc<dyn CustomAction>>,
    state: Mutex<TriggerState>,
}

impl TriggerManager {
    pub fn new(rules: Vec<TriggerRule>, deps: TriggerDeps) -> Self {
        Self {
            rules,
            deps,
            conditions: HashMap::new(),
            actions: HashMap::new(),
            state: Mutex::new(TriggerState::default()),
        }
    }

    pub fn with_condition(mut self, handler: &str, condition: Arc<dyn CustomCondition>) -> Self {
        self.conditions.insert(handler.to_string(), condition);
        self
    }

    pub fn with_action(mut self, handler: &str, action: Arc<dyn CustomAction>) -> Self {
        self.actions.insert(handler.to_string(), action);
        self
    }

    /// Resume cooldown clocks and counters from an earlier run.
    pub fn with_state(self, state: TriggerState) -> Self {
        *self.lock() = state;
        self
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    pub fn state(&self) -> TriggerState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // processEvent
    // -----------------------------------------------------------------------

    /// Run one event through every matching rule. Never fails: per-action
    /// failures are reported in the result and logged.
    #[tracing::instrument(
        level = "debug",
        skip(self, event),
        fields(event_id = %event.id, event_type = %event.event_type, source_id = %event.source_id)
    )]
    pub async fn process_event(&self, event: &TriggerEvent) -> ProcessEventResult {
        let matched: Vec<&TriggerRule> = self.rules.iter().filter(|r| r.matches(event)).collect();
        {
            let mut state = self.lock();
            state.totals.events_processed += 1;
            if matched.is_empty() {
                state.totals.events_unmatched += 1;
            }
        }
        if matched.is_empty() {
            tracing::debug!("no rule matched event");
            return ProcessEventResult {
                event_id: event.id.to_string(),
                success: true,
                message: "no matching rules".to_string(),
                rules: Vec::new(),
            };
        }

        let mut rules = Vec::with_capacity(matched.len());
        for rule in matched {
            let outcome = self.evaluate_rule(rule, event).await;
            rules.push(RuleEvaluation {
                rule_id: rule.id.clone(),
                outcome,
            });
        }

        let failed_actions: usize = rules
            .iter()
            .map(|r| match &r.outcome {
                RuleOutcome::Fired { actions } => actions.iter().filter(|a| !a.success).count(),
                _ => 0,
            })
            .sum();
        let fired = rules.iter().filter(|r| r.fired()).count();
        let message = if failed_actions > 0 {
            format!(
                "{fired} of {} matched rules fired; {failed_actions} action(s) failed",
                rules.len()
            )
        } else {
            format!("{fired} of {} matched rules fired", rules.len())
        };
        tracing::info!(matched = rules.len(), fired, failed_actions, "event processed");

        ProcessEventResult {
            event_id: event.id.to_string(),
            success: failed_actions == 0,
            message,
            rules,
        }
    }

    async fn evaluate_rule(&self, rule: &TriggerRule, event: &TriggerEvent) -> RuleOutcome {
        let now = self.deps.clock.now();

        if let Some(remaining) = self.cooldown_remaining(rule, now) {
            self.lock().totals.cooldown_skips += 1;
            tracing::debug!(rule_id = %rule.id, remaining_secs = remaining, "rule cooling down");
            return RuleOutcome::CoolingDown {
                remaining_secs: remaining,
            };
        }

        for (index, condition) in rule.conditions.iter().enumerate() {
            if let Err(reason) = self.check_condition(condition, event, now).await {
                self.lock().totals.condition_rejections += 1;
                tracing::debug!(rule_id = %rule.id, index, kind = condition.kind(), %reason, "condition failed");
                return RuleOutcome::ConditionFailed {
                    index,
                    condition: condition.kind().to_string(),
                    reason,
                };
            }
        }

        tracing::info!(rule_id = %rule.id, "rule fired");
        let mut actions = Vec::with_capacity(rule.actions.len());
        for (index, action) in rule.actions.iter().enumerate() {
            let (success, message) = match self.execute_action(rule, event, action).await {
                Ok(report) => report,
                Err(e) => (false, e.to_string()),
            };
            if !success {
                tracing::warn!(rule_id = %rule.id, index, kind = action.kind(), %message, "action failed");
            }
            actions.push(ActionOutcome {
                index,
                kind: action.kind().to_string(),
                success,
                message,
            });
        }

        // The cooldown window opens only once every action has finished.
        let finished = self.deps.clock.now();
        let failures = actions.iter().filter(|a| !a.success).count() as u64;
        {
            let mut state = self.lock();
            let entry = state.rules.entry(rule.id.clone()).or_default();
            entry.last_fired = Some(finished);
            entry.fire_count += 1;
            state.totals.rules_fired += 1;
            state.totals.action_failures += failures;
        }
        RuleOutcome::Fired { actions }
    }

    fn cooldown_remaining(&self, rule: &TriggerRule, now: DateTime<Utc>) -> Option<u64> {
        let cooldown = chrono::Duration::from_std(rule.cooldown()?).ok()?;
        let last = self.lock().rules.get(&rule.id)?.last_fired?;
        let elapsed = now - last;
        if elapsed < cooldown {
            let remaining = cooldown - elapsed;
            // Round up so a rule never reports 0s while still blocked.
            Some(((remaining.num_milliseconds() + 999) / 1000).max(1) as u64)
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    async fn check_condition(
        &self,
        condition: &Condition,
        event: &TriggerEvent,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), String> {
        match condition {
            Condition::ConfidenceThreshold { min } => match event.confidence() {
                Some(c) if c >= *min => Ok(()),
                Some(c) => Err(format!("confidence {c} below {min}")),
                None => Err("event carries no confidence".to_string()),
            },
            Condition::DataFreshness { max_age_secs } => {
                let age = now - event.timestamp;
                if age < chrono::Duration::zero() {
                    return Err(format!(
                        "event timestamp {} is ahead of the clock",
                        event.timestamp.to_rfc3339()
                    ));
                }
                let within = i64::try_from(*max_age_secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .map_or(true, |limit| age <= limit);
                if within {
                    Ok(())
                } else {
                    Err(format!(
                        "event is {:.1}s old, limit {max_age_secs}s",
                        age.num_milliseconds() as f64 / 1000.0
                    ))
                }
            }
            Condition::SystemHealth { check } => {
                if self.deps.health.is_healthy(check).await {
                    Ok(())
                } else {
                    Err(format!("health check '{check}' is failing"))
                }
            }
            Condition::Custom { handler, params } => {
                let Some(predicate) = self.conditions.get(handler) else {
                    return Err(format!("no condition handler registered as '{handler}'"));
                };
                match predicate.evaluate(event, params).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(format!("custom condition '{handler}' returned false")),
                    Err(e) => Err(format!("custom condition '{handler}' errored: {e}")),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    async fn execute_action(
        &self,
        rule: &TriggerRule,
        event: &TriggerEvent,
        action: &Action,
    ) -> Result<(bool, String)> {
        match action {
            Action::InvokeRegeneration {
                workflow_id,
                pages,
                mode,
                approval_phase,
            } => {
                self.invoke_regeneration(
                    rule,
                    event,
                    workflow_id,
                    pages,
                    *mode,
                    approval_phase.as_deref(),
                )
                .await
            }
            Action::Notify {
                recipients,
                message,
                severity,
            } => {
                let notification = Notification {
                    recipients: recipients.clone(),
                    message: message.clone(),
                    severity: *severity,
                    metadata: json!({
                        "rule_id": rule.id,
                        "event_id": event.id.to_string(),
                        "event_type": event.event_type,
                        "source_id": event.source_id,
                    }),
                };
                self.deps.notifier.notify(&notification).await?;
                Ok((true, format!("notified {}", recipients.join(", "))))
            }
            Action::Log { message, level } => {
                let rule_id = rule.id.as_str();
                let source_id = event.source_id.as_str();
                match level {
                    LogLevel::Debug => tracing::debug!(rule_id, source_id, "{message}"),
                    LogLevel::Info => tracing::info!(rule_id, source_id, "{message}"),
                    LogLevel::Warn => tracing::warn!(rule_id, source_id, "{message}"),
                    LogLevel::Error => tracing::error!(rule_id, source_id, "{message}"),
                }
                Ok((true, "logged".to_string()))
            }
            Action::Custom { handler, params } => {
                let Some(custom) = self.actions.get(handler) else {
                    return Err(RegenError::InvalidConfig(format!(
                        "no action handler registered as '{handler}'"
                    )));
                };
                let message = custom.execute(event, params).await?;
                Ok((true, message))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn get_trigger_stats(&self) -> TriggerStats {
        let now = self.deps.clock.now();
        let snapshot = self.state();
        let rules = self
            .rules
            .iter()
            .map(|rule| {
                let st = snapshot.rules.get(&rule.id).cloned().unwrap_or_default();
                RuleStats {
                    rule_id: rule.id.clone(),
                    name: rule.name.clone(),
                    enabled: rule.enabled,
                    fire_count: st.fire_count,
                    last_fired: st.last_fired,
                    cooldown_remaining_secs: self.cooldown_remaining(rule, now),
                }
            })
            .collect();
        TriggerStats {
            totals: snapshot.totals,
            rules,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
