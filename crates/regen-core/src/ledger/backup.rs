use std::time::Instant;

use uuid::Uuid;

use super::entry::{
    AuditDetails, AuditOperation, AuditResult, BackupHeader, ContentBackup, Correlation,
    RollbackRequest, RollbackResult,
};
use super::Ledger;
use crate::error::Result;
use crate::paths;
use crate::types::{ContentProvenance, Mode, PageContent};

pub(crate) const PRE_ROLLBACK: &str = "pre-rollback";

/// Millisecond timestamp encoded at the front of a backup artifact name.
pub(super) fn artifact_millis(key: &str) -> Option<i64> {
    let name = key.rsplit('/').next()?;
    let (ms, _) = name.split_once('-')?;
    ms.parse().ok()
}

impl Ledger {
    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    /// Snapshot `content` into a new artifact. Never overwrites an existing
    /// backup; logs a `backup` entry on success and on failure.
    #[tracing::instrument(level = "debug", skip(self, content))]
    pub fn create_backup(
        &self,
        page_id: &str,
        content: &PageContent,
        reason: &str,
    ) -> Result<ContentBackup> {
        paths::validate_id(page_id)?;
        let created_at = self.clock.now();
        let backup = ContentBackup {
            header: BackupHeader {
                backup_id: Uuid::new_v4().to_string(),
                page_id: page_id.to_string(),
                created_at,
                reason: reason.to_string(),
                confidence: content.provenance.confidence,
                source_agents: content.provenance.source_agents.clone(),
            },
            content: content.clone(),
        };
        let key = format!(
            "{}{:013}-{}.json",
            paths::backup_prefix(page_id),
            created_at.timestamp_millis().max(0),
            backup.header.backup_id
        );

        let details = AuditDetails {
            new_fingerprint: Some(content.fingerprint()),
            confidence: content.provenance.confidence,
            sources: content.provenance.source_agents.clone(),
            message: Some(reason.to_string()),
            ..Default::default()
        };
        let correlation = Correlation {
            backup_id: Some(backup.header.backup_id.clone()),
            ..Default::default()
        };

        let write = serde_json::to_vec_pretty(&backup)
            .map_err(Into::into)
            .and_then(|data| self.blobs.put_new(&key, &data));
        if let Err(e) = write {
            tracing::error!(page_id, error = %e, "backup write failed");
            let failed = AuditDetails {
                error: Some(e.to_string()),
                ..details
            };
            if let Err(log_err) = self.append(
                AuditOperation::Backup,
                page_id,
                Mode::Apply,
                AuditResult::Failure,
                failed,
                correlation,
            ) {
                tracing::error!(page_id, error = %log_err, "could not record backup failure");
            }
            return Err(e);
        }

        self.append(
            AuditOperation::Backup,
            page_id,
            Mode::Apply,
            AuditResult::Success,
            details,
            correlation,
        )?;
        tracing::info!(page_id, backup_id = %backup.header.backup_id, reason, "backup created");
        Ok(backup)
    }

    /// Every readable backup for the page, newest first. Equal timestamps
    /// order by backup id, descending. Unreadable artifacts are skipped.
    pub fn list_backups(&self, page_id: &str) -> Result<Vec<ContentBackup>> {
        paths::validate_id(page_id)?;
        let mut out = Vec::new();
        for key in self.blobs.list(&paths::backup_prefix(page_id))? {
            let Some(bytes) = self.blobs.get(&key)? else {
                continue;
            };
            match serde_json::from_slice::<ContentBackup>(&bytes) {
                Ok(b) if b.header.page_id == page_id => out.push(b),
                Ok(b) => tracing::warn!(
                    key,
                    found = %b.header.page_id,
                    "backup artifact belongs to another page; skipping"
                ),
                Err(e) => tracing::warn!(key, error = %e, "corrupt backup artifact; skipping"),
            }
        }
        out.sort_by(|a, b| {
            b.header
                .created_at
                .cmp(&a.header.created_at)
                .then_with(|| b.header.backup_id.cmp(&a.header.backup_id))
        });
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Rollback
    // -----------------------------------------------------------------------

    /// Restore a page from a backup.
    ///
    /// Live content ends up either equal to the backup's content or exactly
    /// as it was; the only live write is one atomic `write_content`. Refusals
    /// and write failures come back as `success: false`; an `Err` means the
    /// audit trail itself could not be written.
    #[tracing::instrument(level = "debug", skip(self, request), fields(page_id = %request.page_id, dry_run = request.dry_run))]
    pub fn rollback(&self, request: RollbackRequest) -> Result<RollbackResult> {
        let started = Instant::now();
        let page_id = request.page_id.as_str();
        paths::validate_id(page_id)?;

        let backups = self.list_backups(page_id)?;
        let target = match request.target_timestamp {
            Some(at) => backups
                .into_iter()
                .find(|b| b.header.created_at.timestamp_millis() == at.timestamp_millis()),
            None => backups.into_iter().next(),
        };

        let Some(target) = target else {
            let message = match request.target_timestamp {
                Some(at) => format!("no backup of {page_id} at {}", at.to_rfc3339()),
                None => format!("no backups exist for {page_id}"),
            };
            if !request.dry_run {
                self.log_rollback(
                    page_id,
                    AuditResult::Failure,
                    AuditDetails {
                        error: Some(message.clone()),
                        duration_ms: Some(started.elapsed().as_millis() as u64),
                        ..Default::default()
                    },
                    Correlation::default(),
                )?;
            }
            return Ok(RollbackResult::failure(page_id, request.dry_run, message));
        };

        let now = self.clock.now();
        let source = &target.content.provenance;
        let restored = PageContent {
            page_id: page_id.to_string(),
            body: target.content.body.clone(),
            provenance: ContentProvenance {
                last_updated: Some(now),
                confidence: source.confidence,
                source_agents: source.source_agents.clone(),
                source_tools: source.source_tools.clone(),
                trigger: Some(format!(
                    "rollback:{}",
                    request.requested_by.as_deref().unwrap_or("manual")
                )),
                restored_from: Some(target.header.created_at),
            },
        };
        let backup_timestamp = Some(target.header.created_at);
        let backup_id = Some(target.header.backup_id.clone());

        if request.dry_run {
            return Ok(RollbackResult {
                success: true,
                message: format!(
                    "dry run: would restore {page_id} from backup taken {}",
                    target.header.created_at.to_rfc3339()
                ),
                page_id: page_id.to_string(),
                dry_run: true,
                restored_content: Some(restored),
                backup_timestamp,
                backup_id,
                pre_rollback_backup: None,
            });
        }

        // Step 1: best-effort snapshot of what is live now.
        let current = match self.content.read_content(page_id) {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(page_id, error = %e, "could not read live content before rollback");
                None
            }
        };
        let previous_fingerprint = current.as_ref().map(PageContent::fingerprint);
        let pre_rollback_backup = match &current {
            Some(live) => match self.create_backup(page_id, live, PRE_ROLLBACK) {
                Ok(b) => Some(b.header.backup_id),
                Err(e) => {
                    tracing::warn!(page_id, error = %e, "pre-rollback backup failed; continuing");
                    None
                }
            },
            None => None,
        };

        let mut details = AuditDetails {
            previous_fingerprint,
            new_fingerprint: Some(restored.fingerprint()),
            confidence: restored.provenance.confidence,
            sources: restored.provenance.source_agents.clone(),
            message: request.reason.clone(),
            ..Default::default()
        };
        let correlation = Correlation {
            backup_id: backup_id.clone(),
            ..Default::default()
        };

        // Step 2: one atomic write of the restored page.
        if let Err(e) = self.content.write_content(&restored) {
            tracing::error!(page_id, error = %e, "rollback write failed");
            details.error = Some(e.to_string());
            details.duration_ms = Some(started.elapsed().as_millis() as u64);
            self.log_rollback(page_id, AuditResult::Failure, details, correlation)?;
            return Ok(RollbackResult {
                pre_rollback_backup,
                ..RollbackResult::failure(page_id, false, format!("rollback failed: {e}"))
            });
        }

        // Step 3: record success.
        details.duration_ms = Some(started.elapsed().as_millis() as u64);
        self.log_rollback(page_id, AuditResult::Success, details, correlation)?;
        tracing::info!(
            page_id,
            backup_id = ?backup_id,
            restored_from = %target.header.created_at,
            "page rolled back"
        );

        Ok(RollbackResult {
            success: true,
            message: format!(
                "restored {page_id} from backup taken {}",
                target.header.created_at.to_rfc3339()
            ),
            page_id: page_id.to_string(),
            dry_run: false,
            restored_content: Some(restored),
            backup_timestamp,
            backup_id,
            pre_rollback_backup,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{fixture, t0};
    use crate::ledger::AuditQuery;
    use crate::store::{BlobStore, ContentStore};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn page(body: serde_json::Value) -> PageContent {
        let mut p = PageContent::new("strategy-plans", body);
        p.provenance.confidence = Some(77.0);
        p.provenance.source_agents = vec!["strategy_workflow".into()];
        p
    }

    #[test]
    fn backups_list_newest_first() {
        let f = fixture();
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        f.clock.advance(Duration::minutes(1));
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 2})), "manual")
            .unwrap();

        let list = f.ledger.list_backups("strategy-plans").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].content.body, json!({"v": 2}));
        assert_eq!(list[0].header.confidence, Some(77.0));
        assert_eq!(list[1].header.created_at, t0());

        let backups_logged = f
            .ledger
            .get_page_audit_logs("strategy-plans", AuditQuery::default())
            .unwrap()
            .into_iter()
            .filter(|e| e.operation == AuditOperation::Backup)
            .count();
        assert_eq!(backups_logged, 2);
    }

    #[test]
    fn same_millisecond_backups_are_distinct_and_ordered_by_id() {
        let f = fixture();
        let a = f
            .ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        let b = f
            .ledger
            .create_backup("strategy-plans", &page(json!({"v": 2})), "manual")
            .unwrap();
        let list = f.ledger.list_backups("strategy-plans").unwrap();
        assert_eq!(list.len(), 2);
        let expected_first = std::cmp::max(&a.header.backup_id, &b.header.backup_id);
        assert_eq!(&list[0].header.backup_id, expected_first);
    }

    #[test]
    fn corrupt_artifact_is_skipped() {
        let f = fixture();
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        f.blobs
            .put_new("backups/strategy-plans/0000000000001-junk.json", b"{not json")
            .unwrap();
        assert_eq!(f.ledger.list_backups("strategy-plans").unwrap().len(), 1);
    }

    #[test]
    fn rollback_restores_newest_and_backs_up_live() {
        let f = fixture();
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        f.content.write_content(&page(json!({"v": 9}))).unwrap();
        f.clock.advance(Duration::minutes(5));

        let out = f
            .ledger
            .rollback(RollbackRequest {
                page_id: "strategy-plans".into(),
                requested_by: Some("ops".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(out.success, "{}", out.message);
        assert_eq!(out.backup_timestamp, Some(t0()));
        assert!(out.pre_rollback_backup.is_some());

        let live = f.content.read_content("strategy-plans").unwrap().unwrap();
        assert_eq!(live.body, json!({"v": 1}));
        assert_eq!(live.provenance.restored_from, Some(t0()));
        assert_eq!(live.provenance.trigger.as_deref(), Some("rollback:ops"));

        // The pre-rollback snapshot is now the newest backup.
        let list = f.ledger.list_backups("strategy-plans").unwrap();
        assert_eq!(list[0].header.reason, PRE_ROLLBACK);
        assert_eq!(list[0].content.body, json!({"v": 9}));

        let rollbacks: Vec<_> = f
            .ledger
            .get_page_audit_logs("strategy-plans", AuditQuery::default())
            .unwrap()
            .into_iter()
            .filter(|e| e.operation == AuditOperation::Rollback)
            .collect();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].result, AuditResult::Success);
    }

    #[test]
    fn rollback_to_specific_timestamp() {
        let f = fixture();
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        f.clock.advance(Duration::hours(1));
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 2})), "manual")
            .unwrap();

        let out = f
            .ledger
            .rollback(RollbackRequest {
                page_id: "strategy-plans".into(),
                target_timestamp: Some(t0()),
                ..Default::default()
            })
            .unwrap();
        assert!(out.success);
        assert_eq!(
            f.content.read_content("strategy-plans").unwrap().unwrap().body,
            json!({"v": 1})
        );
    }

    #[test]
    fn dry_run_writes_nothing() {
        let f = fixture();
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        f.content.write_content(&page(json!({"v": 9}))).unwrap();
        let blobs_before = f.blobs.list("").unwrap();
        let audit_before = f.blobs.get("audit/2026-03-09.jsonl").unwrap();

        let out = f
            .ledger
            .rollback(RollbackRequest {
                page_id: "strategy-plans".into(),
                dry_run: true,
                ..Default::default()
            })
            .unwrap();
        assert!(out.success);
        assert!(out.dry_run);
        assert_eq!(out.restored_content.unwrap().body, json!({"v": 1}));

        assert_eq!(
            f.content.read_content("strategy-plans").unwrap().unwrap().body,
            json!({"v": 9})
        );
        assert_eq!(f.blobs.list("").unwrap(), blobs_before);
        assert_eq!(f.blobs.get("audit/2026-03-09.jsonl").unwrap(), audit_before);
    }

    #[test]
    fn failed_write_leaves_content_unchanged() {
        let f = fixture();
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        let live = page(json!({"v": 9}));
        f.content.write_content(&live).unwrap();
        f.content.fail_writes.store(true, Ordering::SeqCst);

        let out = f
            .ledger
            .rollback(RollbackRequest {
                page_id: "strategy-plans".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(!out.success);
        assert!(out.message.contains("write refused"));
        assert_eq!(f.content.read_content("strategy-plans").unwrap().unwrap(), live);

        let failures = f
            .ledger
            .get_page_audit_logs("strategy-plans", AuditQuery::default())
            .unwrap()
            .into_iter()
            .filter(|e| e.operation == AuditOperation::Rollback && e.result == AuditResult::Failure)
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn unreadable_live_content_does_not_block_rollback() {
        let f = fixture();
        f.ledger
            .create_backup("strategy-plans", &page(json!({"v": 1})), "manual")
            .unwrap();
        f.content.fail_reads.store(true, Ordering::SeqCst);
        let out = f
            .ledger
            .rollback(RollbackRequest {
                page_id: "strategy-plans".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(out.success);
        assert!(out.pre_rollback_backup.is_none());
    }

    #[test]
    fn missing_backup_fails_and_is_logged() {
        let f = fixture();
        let out = f
            .ledger
            .rollback(RollbackRequest {
                page_id: "strategy-plans".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(!out.success);
        let entries = f
            .ledger
            .get_page_audit_logs("strategy-plans", AuditQuery::default())
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].result, AuditResult::Failure);
    }

    #[test]
    fn artifact_name_carries_millis() {
        assert_eq!(
            artifact_millis("backups/strategy-plans/1773057600000-abc.json"),
            Some(1_773_057_600_000)
        );
        assert_eq!(artifact_millis("backups/x/garbage.json"), None);
    }
}
