use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};

use super::backup::artifact_millis;
use super::entry::{AuditLogEntry, AuditQuery, AuditResult, AuditStats, CleanupReport};
use super::{Ledger, RECENT_FAILURES};
use crate::error::Result;
use crate::paths::{self, AUDIT_PREFIX, BACKUPS_PREFIX};

fn partition_day(key: &str) -> Option<NaiveDate> {
    let day = key.strip_prefix(AUDIT_PREFIX)?.strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

impl Ledger {
    /// Entries from the last `days` days, newest first. Lines that fail to
    /// parse are skipped with a warning.
    fn read_window(&self, days: u32) -> Result<Vec<AuditLogEntry>> {
        let days = days.max(1);
        let now = self.clock.now();
        let cutoff = now - Duration::days(i64::from(days));
        let today = now.date_naive();

        let mut entries = Vec::new();
        for back in 0..=i64::from(days) {
            let key = paths::audit_partition_key(today - Duration::days(back));
            let Some(bytes) = self.blobs.get(&key)? else {
                continue;
            };
            for (n, line) in String::from_utf8_lossy(&bytes).lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditLogEntry>(line) {
                    Ok(entry) if entry.timestamp >= cutoff => entries.push(entry),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(key, line = n + 1, error = %e, "skipping corrupt audit line")
                    }
                }
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }

    pub fn get_page_audit_logs(
        &self,
        page_id: &str,
        query: AuditQuery,
    ) -> Result<Vec<AuditLogEntry>> {
        let entries = self
            .read_window(query.days)?
            .into_iter()
            .filter(|e| e.page_id == page_id);
        Ok(match query.limit {
            Some(limit) => entries.take(limit).collect(),
            None => entries.collect(),
        })
    }

    pub fn get_recent_audit_logs(&self, query: AuditQuery) -> Result<Vec<AuditLogEntry>> {
        let mut entries = self.read_window(query.days)?;
        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    pub fn get_audit_stats(&self, days: u32) -> Result<AuditStats> {
        let entries = self.read_window(days)?;

        let mut by_operation: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_result: BTreeMap<String, usize> = BTreeMap::new();
        let mut pages = BTreeSet::new();
        for e in &entries {
            *by_operation.entry(e.operation.to_string()).or_default() += 1;
            *by_result.entry(e.result.to_string()).or_default() += 1;
            pages.insert(e.page_id.as_str());
        }

        Ok(AuditStats {
            period_days: days.max(1),
            total_entries: entries.len(),
            average_confidence: mean(entries.iter().filter_map(|e| e.details.confidence)),
            average_duration_ms: mean(
                entries
                    .iter()
                    .filter_map(|e| e.details.duration_ms)
                    .map(|d| d as f64),
            ),
            pages_touched: pages.len(),
            recent_failures: entries
                .iter()
                .filter(|e| e.result == AuditResult::Failure)
                .take(RECENT_FAILURES)
                .cloned()
                .collect(),
            by_operation,
            by_result,
        })
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Delete audit partitions older than `log_days` and backups older than
    /// `backup_days`, then prune emptied backup directories.
    ///
    /// Only artifacts already past retention are touched, so this can run
    /// alongside writers.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let now = self.clock.now();
        let mut report = CleanupReport::default();

        let oldest_day = now.date_naive() - Duration::days(i64::from(self.retention.log_days));
        for key in self.blobs.list(AUDIT_PREFIX)? {
            match partition_day(&key) {
                Some(day) if day < oldest_day => {
                    if self.blobs.delete(&key)? {
                        report.log_partitions_removed += 1;
                    }
                }
                Some(_) => {}
                None => tracing::debug!(key, "ignoring unrecognised audit blob"),
            }
        }

        let backup_cutoff =
            (now - Duration::days(i64::from(self.retention.backup_days))).timestamp_millis();
        for key in self.blobs.list(BACKUPS_PREFIX)? {
            match artifact_millis(&key) {
                Some(ms) if ms < backup_cutoff => {
                    if self.blobs.delete(&key)? {
                        report.backups_removed += 1;
                    }
                }
                Some(_) => {}
                None => tracing::debug!(key, "ignoring unrecognised backup blob"),
            }
        }

        report.empty_dirs_removed = self.blobs.prune_empty(BACKUPS_PREFIX)?;
        tracing::info!(
            log_partitions = report.log_partitions_removed,
            backups = report.backups_removed,
            dirs = report.empty_dirs_removed,
            "retention sweep complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RetentionConfig;
    use crate::ledger::entry::{AuditDetails, AuditOperation, Correlation, GenerationRecord};
    use crate::ledger::tests::{fixture, t0};
    use crate::store::{BlobStore, FsBlobStore, MemoryContentStore};
    use crate::types::{Mode, PageContent};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(page: &str, result: AuditResult, confidence: f64, ms: u64) -> GenerationRecord {
        GenerationRecord {
            page_id: page.to_string(),
            mode: Mode::Apply,
            result,
            details: AuditDetails {
                confidence: Some(confidence),
                duration_ms: Some(ms),
                ..Default::default()
            },
            correlation: Correlation::default(),
        }
    }

    #[test]
    fn window_and_limit() {
        let f = fixture();
        for _ in 0..3 {
            f.ledger
                .log_content_generation(record("strategy-plans", AuditResult::Success, 80.0, 10))
                .unwrap();
            f.clock.advance(Duration::days(2));
        }
        // Entries at t0, t0+2d, t0+4d; now is t0+6d.
        let q = |days, limit| AuditQuery { days, limit };
        assert_eq!(f.ledger.get_recent_audit_logs(q(3, None)).unwrap().len(), 1);
        assert_eq!(f.ledger.get_recent_audit_logs(q(30, None)).unwrap().len(), 3);
        let limited = f.ledger.get_recent_audit_logs(q(30, Some(2))).unwrap();
        assert_eq!(limited.len(), 2);
        assert!(limited[0].timestamp > limited[1].timestamp);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let f = fixture();
        f.ledger
            .log_content_generation(record("strategy-plans", AuditResult::Success, 80.0, 10))
            .unwrap();
        f.blobs
            .append("audit/2026-03-09.jsonl", b"{truncated\n")
            .unwrap();
        f.ledger
            .log_content_generation(record("strategy-plans", AuditResult::Failure, 40.0, 30))
            .unwrap();
        let entries = f
            .ledger
            .get_page_audit_logs("strategy-plans", AuditQuery::default())
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn stats_summarise_window() {
        let f = fixture();
        f.ledger
            .log_content_generation(record("strategy-plans", AuditResult::Success, 80.0, 10))
            .unwrap();
        f.ledger
            .log_content_generation(record("quick-wins", AuditResult::Failure, 40.0, 30))
            .unwrap();
        f.ledger
            .create_backup("quick-wins", &PageContent::new("quick-wins", json!({})), "manual")
            .unwrap();

        let stats = f.ledger.get_audit_stats(7).unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_operation.get("generate"), Some(&2));
        assert_eq!(stats.by_operation.get("backup"), Some(&1));
        assert_eq!(stats.by_result.get("failure"), Some(&1));
        assert_eq!(stats.average_confidence, Some(60.0));
        assert_eq!(stats.average_duration_ms, Some(20.0));
        assert_eq!(stats.pages_touched, 2);
        assert_eq!(stats.recent_failures.len(), 1);
        assert_eq!(stats.recent_failures[0].operation, AuditOperation::Generate);
    }

    #[test]
    fn empty_stats() {
        let f = fixture();
        let stats = f.ledger.get_audit_stats(7).unwrap();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.average_confidence, None);
    }

    #[test]
    fn cleanup_respects_retention_and_prunes_dirs() {
        let dir = TempDir::new().unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path()));
        let clock = Arc::new(ManualClock::new(t0()));
        let ledger = Ledger::new(
            blobs.clone(),
            Arc::new(MemoryContentStore::new()),
            RetentionConfig {
                log_days: 30,
                backup_days: 7,
            },
            clock.clone(),
        );

        ledger
            .create_backup("old-page", &PageContent::new("old-page", json!({})), "manual")
            .unwrap();
        clock.advance(Duration::days(10));
        ledger
            .create_backup("strategy-plans", &PageContent::new("strategy-plans", json!({})), "manual")
            .unwrap();
        clock.advance(Duration::days(25));

        let report = ledger.cleanup().unwrap();
        // Both backups are older than 7 days; only the t0 partition is older
        // than 30 days.
        assert_eq!(report.backups_removed, 2);
        assert_eq!(report.log_partitions_removed, 1);
        assert_eq!(report.empty_dirs_removed, 2);
        assert!(blobs.list("backups/").unwrap().is_empty());
        assert_eq!(blobs.list("audit/").unwrap().len(), 1);

        let again = ledger.cleanup().unwrap();
        assert_eq!(again, CleanupReport::default());
    }

    #[test]
    fn cleanup_keeps_fresh_backups() {
        let f = fixture();
        f.ledger
            .create_backup(
                "strategy-plans",
                &PageContent::new("strategy-plans", json!({})),
                "manual",
            )
            .unwrap();
        f.clock.advance(Duration::days(6));
        let report = f.ledger.cleanup().unwrap();
        assert_eq!(report.backups_removed, 0);
        assert_eq!(f.ledger.list_backups("strategy-plans").unwrap().len(), 1);
    }
}
