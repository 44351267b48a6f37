use crate::aggregator::mapping::{default_page_sources, PageSourceMap};
use crate::error::{RegenError, Result};
use crate::external::TenantInstructions;
use crate::paths;
use crate::trigger::rule::{Action, TriggerRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ApprovalConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u32,
    /// When true an approve decision needs a second, distinct approver.
    #[serde(default)]
    pub dual_approval: bool,
    /// phase → roles allowed to review it.
    #[serde(default = "default_phase_roles")]
    pub phase_roles: BTreeMap<String, Vec<String>>,
    /// role → reviewer ids.
    #[serde(default)]
    pub reviewers: BTreeMap<String, Vec<String>>,
}

fn default_expiry_hours() -> u32 {
    72
}

fn default_phase_roles() -> BTreeMap<String, Vec<String>> {
    let mut roles = BTreeMap::new();
    roles.insert("draft".to_string(), vec!["content-editor".to_string()]);
    roles.insert(
        "publish".to_string(),
        vec!["content-editor".to_string(), "content-lead".to_string()],
    );
    roles
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            expiry_hours: default_expiry_hours(),
            dual_approval: false,
            phase_roles: default_phase_roles(),
            reviewers: BTreeMap::new(),
        }
    }
}

impl ApprovalConfig {
    /// Reviewer ids eligible for `phase`, deduplicated, in role order.
    pub fn reviewers_for(&self, phase: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for role in self.phase_roles.get(phase).into_iter().flatten() {
            for reviewer in self.reviewers.get(role).into_iter().flatten() {
                if !out.contains(reviewer) {
                    out.push(reviewer.clone());
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// RetentionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_log_days")]
    pub log_days: u32,
    #[serde(default = "default_backup_days")]
    pub backup_days: u32,
}

fn default_log_days() -> u32 {
    30
}

fn default_backup_days() -> u32 {
    7
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            log_days: default_log_days(),
            backup_days: default_backup_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// AggregatorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_instructions_ttl")]
    pub instructions_ttl_secs: u64,
    #[serde(default = "default_agent_ttl")]
    pub agent_ttl_secs: u64,
    #[serde(default = "default_tool_ttl")]
    pub tool_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
    /// Served when the upstream instructions are unavailable.
    #[serde(default = "default_tenant_instructions")]
    pub default_instructions: TenantInstructions,
    #[serde(default = "default_page_sources")]
    pub sources: PageSourceMap,
}

fn default_instructions_ttl() -> u64 {
    5 * 60
}

fn default_agent_ttl() -> u64 {
    10 * 60
}

fn default_tool_ttl() -> u64 {
    15 * 60
}

fn default_fetch_timeout() -> u64 {
    10_000
}

fn default_tenant_instructions() -> TenantInstructions {
    let mut rubric = BTreeMap::new();
    rubric.insert("1".to_string(), "ad hoc".to_string());
    rubric.insert("2".to_string(), "repeatable".to_string());
    rubric.insert("3".to_string(), "defined".to_string());
    rubric.insert("4".to_string(), "managed".to_string());
    rubric.insert("5".to_string(), "optimizing".to_string());
    TenantInstructions {
        tone_rules: vec![
            "Write in plain, direct language.".to_string(),
            "Prefer concrete next steps over general advice.".to_string(),
        ],
        forbidden_metrics: Vec::new(),
        personas: vec!["marketing lead".to_string()],
        maturity_rubric: rubric,
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            instructions_ttl_secs: default_instructions_ttl(),
            agent_ttl_secs: default_agent_ttl(),
            tool_ttl_secs: default_tool_ttl(),
            fetch_timeout_ms: default_fetch_timeout(),
            default_instructions: default_tenant_instructions(),
            sources: default_page_sources(),
        }
    }
}

// ---------------------------------------------------------------------------
// UpstreamConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_token_env() -> String {
    "REGEN_UPSTREAM_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rules: Vec<TriggerRule>,
}

impl PipelineConfig {
    /// Load `.regen/config.yaml`; a missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: PipelineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Load and reject configurations with error-level warnings.
    pub fn load_validated(root: &Path) -> Result<Self> {
        let cfg = Self::load(root)?;
        let errors: Vec<String> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(RegenError::InvalidConfig(errors.join("; ")));
        }
        Ok(cfg)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for rule in &self.rules {
            if paths::validate_id(&rule.id).is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("rule id '{}' is not a valid id", rule.id),
                });
            }
            if !seen.insert(rule.id.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("duplicate rule id '{}'", rule.id),
                });
            }
            if rule.actions.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("rule '{}' has no actions", rule.id),
                });
            }
            if rule.event_types.is_empty() || rule.source_ids.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "rule '{}' lists no event types or no source ids and can never match",
                        rule.id
                    ),
                });
            }
            for action in &rule.actions {
                let Action::InvokeRegeneration {
                    pages,
                    approval_phase,
                    ..
                } = action
                else {
                    continue;
                };
                for page in pages {
                    if paths::validate_id(&page.page_id).is_err() {
                        warnings.push(ConfigWarning {
                            level: WarnLevel::Error,
                            message: format!(
                                "rule '{}' targets invalid page id '{}'",
                                rule.id, page.page_id
                            ),
                        });
                    }
                }
                if let Some(phase) = approval_phase {
                    if self.approval.reviewers_for(phase).is_empty() {
                        warnings.push(ConfigWarning {
                            level: WarnLevel::Warning,
                            message: format!(
                                "rule '{}' requires approval phase '{phase}' but no reviewers are configured for it",
                                rule.id
                            ),
                        });
                    }
                }
            }
        }

        if self.aggregator.fetch_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "aggregator.fetch_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.approval.expiry_hours == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "approval.expiry_hours is 0; every approval expires immediately"
                    .to_string(),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = PipelineConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.retention.log_days, 30);
        assert_eq!(cfg.retention.backup_days, 7);
        assert_eq!(cfg.aggregator.agent_ttl_secs, 600);
        assert_eq!(cfg.approval.expiry_hours, 72);
        assert!(cfg.rules.is_empty());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
retention:
  log_days: 10
approval:
  dual_approval: true
  reviewers:
    content-editor: [alice, bob]
rules:
  - id: strategy-workflow-completion
    name: Strategy workflow completed
    event_types: [agent_completion]
    source_ids: [strategy_workflow]
    cooldown_secs: 300
    conditions:
      - type: confidence_threshold
        min: 60
    actions:
      - type: invoke_regeneration
        workflow_id: page-refresh
        pages:
          - page_id: strategy-plans
            tier: 1
"#;
        let cfg: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.retention.log_days, 10);
        assert_eq!(cfg.retention.backup_days, 7);
        assert!(cfg.approval.dual_approval);
        assert_eq!(cfg.approval.reviewers_for("draft"), vec!["alice", "bob"]);
        assert_eq!(cfg.rules.len(), 1);
        assert!(cfg.rules[0].enabled);
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.retention.backup_days = 3;
        cfg.save(dir.path()).unwrap();
        let loaded = PipelineConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.retention.backup_days, 3);
    }

    #[test]
    fn reviewers_for_dedups_across_roles() {
        let mut cfg = ApprovalConfig::default();
        cfg.reviewers
            .insert("content-editor".into(), vec!["alice".into(), "bob".into()]);
        cfg.reviewers
            .insert("content-lead".into(), vec!["bob".into(), "carol".into()]);
        assert_eq!(cfg.reviewers_for("publish"), vec!["alice", "bob", "carol"]);
        assert!(cfg.reviewers_for("unknown-phase").is_empty());
    }

    #[test]
    fn duplicate_rule_ids_are_errors() {
        let rule: TriggerRule = serde_yaml::from_str(
            "id: r1\nname: R\nevent_types: [manual_trigger]\nsource_ids: [admin]\nactions:\n  - type: log\n    message: hi\n",
        )
        .unwrap();
        let cfg = PipelineConfig {
            rules: vec![rule.clone(), rule],
            ..Default::default()
        };
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("duplicate")));
    }

    #[test]
    fn approval_phase_without_reviewers_warns() {
        let rule: TriggerRule = serde_yaml::from_str(
            r#"
id: r1
name: R
event_types: [schedule]
source_ids: [nightly]
actions:
  - type: invoke_regeneration
    workflow_id: wf
    approval_phase: publish
    pages: [{page_id: strategy-plans}]
"#,
        )
        .unwrap();
        let cfg = PipelineConfig {
            rules: vec![rule],
            ..Default::default()
        };
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("no reviewers")));
    }
}
