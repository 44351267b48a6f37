use crate::error::{RegenError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const REGEN_DIR: &str = ".regen";
pub const CONFIG_FILE: &str = ".regen/config.yaml";
pub const APPROVALS_DB: &str = ".regen/approvals.redb";
pub const LEDGER_DIR: &str = ".regen/ledger";
pub const CONTENT_DIR: &str = ".regen/content";
pub const TRIGGER_STATE_FILE: &str = ".regen/trigger-state.json";

/// Blob-store key prefix for audit partitions (`audit/<YYYY-MM-DD>.jsonl`).
pub const AUDIT_PREFIX: &str = "audit/";
/// Blob-store key prefix for backups (`backups/<page-key>/<artifact>.json`).
pub const BACKUPS_PREFIX: &str = "backups/";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn regen_dir(root: &Path) -> PathBuf {
    root.join(REGEN_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn approvals_db_path(root: &Path) -> PathBuf {
    root.join(APPROVALS_DB)
}

pub fn ledger_dir(root: &Path) -> PathBuf {
    root.join(LEDGER_DIR)
}

pub fn content_dir(root: &Path) -> PathBuf {
    root.join(CONTENT_DIR)
}

pub fn trigger_state_path(root: &Path) -> PathBuf {
    root.join(TRIGGER_STATE_FILE)
}

// ---------------------------------------------------------------------------
// Storage keys
// ---------------------------------------------------------------------------

/// Map a page id onto a single flat storage segment.
///
/// Page ids are path-shaped (`strategy-plans/quick-wins`); `~` never appears
/// in a valid id, so distinct pages never share a key.
pub fn page_key(page_id: &str) -> String {
    page_id.replace('/', "~")
}

pub fn audit_partition_key(day: chrono::NaiveDate) -> String {
    format!("{AUDIT_PREFIX}{}.jsonl", day.format("%Y-%m-%d"))
}

pub fn backup_prefix(page_id: &str) -> String {
    format!("{BACKUPS_PREFIX}{}/", page_key(page_id))
}

// ---------------------------------------------------------------------------
// Id validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_\-]*(/[a-z0-9][a-z0-9_\-]*)*$").expect("static id regex")
    })
}

/// Validate a page, rule, or spec id.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 || !id_re().is_match(id) {
        return Err(RegenError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in [
            "strategy-plans",
            "strategy-plans/quick-wins",
            "a",
            "tool_data/v2",
        ] {
            validate_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        for id in ["", "/leading", "trailing/", "UPPER", "has space", "a//b", "../x"] {
            assert!(validate_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn page_key_is_flat_and_distinct() {
        let key = page_key("strategy-plans/quick-wins");
        assert!(!key.contains('/'));
        assert_ne!(key, page_key("strategy-plans-quick-wins"));
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/site");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/site/.regen/config.yaml")
        );
        assert_eq!(ledger_dir(root), PathBuf::from("/tmp/site/.regen/ledger"));
        let day = chrono::NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(audit_partition_key(day), "audit/2026-03-09.jsonl");
        assert_eq!(backup_prefix("a/b"), "backups/a~b/");
    }
}
