//! Append-only audit log plus point-in-time backups.
//!
//! Audit entries are JSON lines appended to one blob per UTC day
//! (`audit/<YYYY-MM-DD>.jsonl`). Backups are one immutable blob each under
//! `backups/<page-key>/<created-ms>-<backup-id>.json`. The ledger is the only
//! component that writes either.

mod backup;
pub mod entry;
mod query;

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RetentionConfig;
use crate::error::Result;
use crate::paths;
use crate::store::{BlobStore, ContentStore};
use crate::types::Mode;

pub use entry::{
    AuditDetails, AuditLogEntry, AuditOperation, AuditQuery, AuditResult, AuditStats,
    BackupHeader, CleanupReport, ContentBackup, Correlation, GenerationRecord, RollbackRequest,
    RollbackResult,
};

/// Number of failures surfaced in [`AuditStats::recent_failures`].
pub const RECENT_FAILURES: usize = 10;

pub struct Ledger {
    blobs: Arc<dyn BlobStore>,
    content: Arc<dyn ContentStore>,
    retention: RetentionConfig,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        content: Arc<dyn ContentStore>,
        retention: RetentionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blobs,
            content,
            retention,
            clock,
        }
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    // -----------------------------------------------------------------------
    // Audit writes
    // -----------------------------------------------------------------------

    /// Record a regeneration attempt.
    pub fn log_content_generation(&self, record: GenerationRecord) -> Result<AuditLogEntry> {
        let operation = record.operation();
        self.append(
            operation,
            &record.page_id,
            record.mode,
            record.result,
            record.details,
            record.correlation,
        )
    }

    pub fn log_rollback(
        &self,
        page_id: &str,
        result: AuditResult,
        details: AuditDetails,
        correlation: Correlation,
    ) -> Result<AuditLogEntry> {
        self.append(
            AuditOperation::Rollback,
            page_id,
            Mode::Apply,
            result,
            details,
            correlation,
        )
    }

    pub fn log_validation(
        &self,
        page_id: &str,
        mode: Mode,
        result: AuditResult,
        details: AuditDetails,
        correlation: Correlation,
    ) -> Result<AuditLogEntry> {
        self.append(
            AuditOperation::Validation,
            page_id,
            mode,
            result,
            details,
            correlation,
        )
    }

    fn append(
        &self,
        operation: AuditOperation,
        page_id: &str,
        mode: Mode,
        result: AuditResult,
        details: AuditDetails,
        correlation: Correlation,
    ) -> Result<AuditLogEntry> {
        let entry = AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: self.clock.now(),
            operation,
            page_id: page_id.to_string(),
            mode,
            result,
            details,
            correlation,
        };
        let key = paths::audit_partition_key(entry.timestamp.date_naive());
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        if let Err(e) = self.blobs.append(&key, &line) {
            tracing::error!(
                page_id,
                operation = %operation,
                error = %e,
                "failed to append audit entry"
            );
            return Err(e);
        }
        tracing::debug!(page_id, operation = %operation, result = %result, "audit entry appended");
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RegenError;
    use crate::store::{MemoryBlobStore, MemoryContentStore};
    use crate::types::PageContent;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap()
    }

    /// Content store whose writes can be switched to fail.
    #[derive(Default)]
    pub(crate) struct FlakyContent {
        pub inner: MemoryContentStore,
        pub fail_writes: AtomicBool,
        pub fail_reads: AtomicBool,
    }

    impl ContentStore for FlakyContent {
        fn read_content(&self, page_id: &str) -> Result<Option<PageContent>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(RegenError::Storage("read refused".into()));
            }
            self.inner.read_content(page_id)
        }

        fn write_content(&self, content: &PageContent) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(RegenError::Storage("write refused".into()));
            }
            self.inner.write_content(content)
        }
    }

    pub(crate) struct Fixture {
        pub ledger: Ledger,
        pub blobs: Arc<MemoryBlobStore>,
        pub content: Arc<FlakyContent>,
        pub clock: Arc<ManualClock>,
    }

    pub(crate) fn fixture() -> Fixture {
        let blobs = Arc::new(MemoryBlobStore::new());
        let content = Arc::new(FlakyContent::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let ledger = Ledger::new(
            blobs.clone(),
            content.clone(),
            RetentionConfig::default(),
            clock.clone(),
        );
        Fixture {
            ledger,
            blobs,
            content,
            clock,
        }
    }

    fn record(page: &str, previous: Option<&str>) -> GenerationRecord {
        GenerationRecord {
            page_id: page.to_string(),
            mode: Mode::Apply,
            result: AuditResult::Success,
            details: AuditDetails {
                previous_fingerprint: previous.map(str::to_string),
                new_fingerprint: Some("new".into()),
                confidence: Some(80.0),
                ..Default::default()
            },
            correlation: Correlation::default(),
        }
    }

    #[test]
    fn generation_vs_update() {
        let f = fixture();
        let a = f
            .ledger
            .log_content_generation(record("strategy-plans", None))
            .unwrap();
        let b = f
            .ledger
            .log_content_generation(record("strategy-plans", Some("old")))
            .unwrap();
        assert_eq!(a.operation, AuditOperation::Generate);
        assert_eq!(b.operation, AuditOperation::Update);
    }

    #[test]
    fn entries_land_in_their_day_partition() {
        let f = fixture();
        f.ledger
            .log_content_generation(record("strategy-plans", None))
            .unwrap();
        f.clock.advance(chrono::Duration::days(1));
        f.ledger
            .log_validation(
                "strategy-plans",
                Mode::Preview,
                AuditResult::Warning,
                AuditDetails::default(),
                Correlation::default(),
            )
            .unwrap();
        assert_eq!(
            f.blobs.list("audit/").unwrap(),
            vec!["audit/2026-03-09.jsonl", "audit/2026-03-10.jsonl"]
        );
    }

    #[test]
    fn every_log_call_is_retrievable_once() {
        let f = fixture();
        f.ledger
            .log_content_generation(record("strategy-plans", None))
            .unwrap();
        f.ledger
            .log_rollback(
                "strategy-plans",
                AuditResult::Failure,
                AuditDetails::default(),
                Correlation::default(),
            )
            .unwrap();
        f.ledger
            .log_validation(
                "strategy-plans",
                Mode::Apply,
                AuditResult::Success,
                AuditDetails::default(),
                Correlation::default(),
            )
            .unwrap();
        f.ledger
            .log_content_generation(record("quick-wins", None))
            .unwrap();

        let entries = f
            .ledger
            .get_page_audit_logs("strategy-plans", AuditQuery::default())
            .unwrap();
        assert_eq!(entries.len(), 3);
        let ops: Vec<_> = entries.iter().map(|e| e.operation).collect();
        assert!(ops.contains(&AuditOperation::Generate));
        assert!(ops.contains(&AuditOperation::Rollback));
        assert!(ops.contains(&AuditOperation::Validation));
    }
}
