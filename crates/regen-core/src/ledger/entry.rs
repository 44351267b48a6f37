use crate::types::{Mode, PageContent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// AuditOperation / AuditResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Generate,
    Update,
    Rollback,
    Backup,
    Validation,
}

impl AuditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOperation::Generate => "generate",
            AuditOperation::Update => "update",
            AuditOperation::Rollback => "rollback",
            AuditOperation::Backup => "backup",
            AuditOperation::Validation => "validation",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Skipped,
    Warning,
}

impl AuditResult {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
            AuditResult::Skipped => "skipped",
            AuditResult::Warning => "warning",
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuditLogEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuditDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Agents and tools that contributed to the content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Ids linking an entry to the event, rule, approval, backup, or run that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub page_id: String,
    pub mode: Mode,
    pub result: AuditResult,
    #[serde(default)]
    pub details: AuditDetails,
    #[serde(default)]
    pub correlation: Correlation,
}

/// Input to `Ledger::log_content_generation`.
///
/// The recorded operation is `update` when `previous_fingerprint` is set
/// (live content existed before the write) and `generate` otherwise.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub page_id: String,
    pub mode: Mode,
    pub result: AuditResult,
    pub details: AuditDetails,
    pub correlation: Correlation,
}

impl GenerationRecord {
    pub fn operation(&self) -> AuditOperation {
        if self.details.previous_fingerprint.is_some() {
            AuditOperation::Update
        } else {
            AuditOperation::Generate
        }
    }
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupHeader {
    pub backup_id: String,
    pub page_id: String,
    pub created_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source_agents: Vec<String>,
}

/// One immutable snapshot of a page, as stored in a backup artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBackup {
    pub header: BackupHeader,
    pub content: PageContent,
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RollbackRequest {
    pub page_id: String,
    /// Restore the backup created at this instant (millisecond precision);
    /// `None` picks the newest.
    pub target_timestamp: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub reason: Option<String>,
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub message: String,
    pub page_id: String,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_content: Option<PageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    /// Id of the backup taken of the live content just before restoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_rollback_backup: Option<String>,
}

impl RollbackResult {
    pub(crate) fn failure(page_id: &str, dry_run: bool, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            page_id: page_id.to_string(),
            dry_run,
            restored_content: None,
            backup_timestamp: None,
            backup_id: None,
            pre_rollback_backup: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditQuery {
    /// Lookback window in days.
    pub days: u32,
    pub limit: Option<usize>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            days: 7,
            limit: Some(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub period_days: u32,
    pub total_entries: usize,
    pub by_operation: std::collections::BTreeMap<String, usize>,
    pub by_result: std::collections::BTreeMap<String, usize>,
    pub average_confidence: Option<f64>,
    pub average_duration_ms: Option<f64>,
    pub pages_touched: usize,
    pub recent_failures: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub log_partitions_removed: usize,
    pub backups_removed: usize,
    pub empty_dirs_removed: usize,
}
