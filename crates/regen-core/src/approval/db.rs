//! Durable storage for approval requests using redb.
//!
//! # Table design
//!
//! `REQUESTS` maps approval id → JSON-encoded [`ApprovalRequest`] (responses
//! embedded). `BY_SPEC` is an ordered index:
//! ```text
//! "<spec_id> \x1f <phase> \x1f <created_ms: 16 digits> \x1f <approval_id>" → approval_id
//! ```
//! Zero-padded milliseconds make byte order equal creation order, and the
//! trailing id breaks timestamp ties deterministically. A prefix range scan
//! returns every request for one (spec, phase) oldest-first.
//!
//! Every mutation runs inside a single redb write transaction. redb admits
//! one writer at a time, so "read record, check state, write record" is a
//! critical section per database: two reviewers can never both observe the
//! same pre-image.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{RegenError, Result};

use super::model::{ApprovalRequest, ApprovalState};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("approval_requests");
const BY_SPEC: TableDefinition<&str, &str> = TableDefinition::new("approvals_by_spec");

const SEP: char = '\u{1f}';

fn db_err(e: impl std::fmt::Display) -> RegenError {
    RegenError::ApprovalDb(e.to_string())
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn spec_prefix(spec_id: &str, phase: &str) -> String {
    format!("{spec_id}{SEP}{phase}{SEP}")
}

/// Exclusive upper bound for a prefix scan; `~` sorts after every digit.
fn prefix_end(prefix: &str) -> String {
    format!("{prefix}~")
}

fn index_key(req: &ApprovalRequest) -> String {
    let ms = req.created_at.timestamp_millis().max(0) as u64;
    format!(
        "{}{ms:016}{SEP}{}",
        spec_prefix(&req.spec_id, &req.phase),
        req.id
    )
}

fn decode(bytes: &[u8]) -> Result<ApprovalRequest> {
    serde_json::from_slice(bytes).map_err(db_err)
}

/// Outcome of [`ApprovalDb::insert_unless_pending`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// A live pending request already existed; nothing was written.
    Existing(ApprovalRequest),
    Created(ApprovalRequest),
}

// ---------------------------------------------------------------------------
// ApprovalDb
// ---------------------------------------------------------------------------

pub struct ApprovalDb {
    db: Database,
}

impl ApprovalDb {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(REQUESTS).map_err(db_err)?;
        wt.open_table(BY_SPEC).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    pub fn get(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(REQUESTS).map_err(db_err)?;
        let bytes = table.get(id).map_err(db_err)?.map(|g| g.value().to_vec());
        bytes.as_deref().map(decode).transpose()
    }

    /// All requests for (spec, phase), oldest first.
    pub fn list_for(&self, spec_id: &str, phase: &str) -> Result<Vec<ApprovalRequest>> {
        let prefix = spec_prefix(spec_id, phase);
        let end = prefix_end(&prefix);
        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(BY_SPEC).map_err(db_err)?;
        let requests = rt.open_table(REQUESTS).map_err(db_err)?;

        let mut out = Vec::new();
        for entry in index
            .range(prefix.as_str()..end.as_str())
            .map_err(db_err)?
        {
            let (_, id) = entry.map_err(db_err)?;
            let bytes = requests
                .get(id.value())
                .map_err(db_err)?
                .map(|g| g.value().to_vec());
            match bytes {
                Some(bytes) => out.push(decode(&bytes)?),
                None => tracing::warn!(id = id.value(), "approval index points at missing record"),
            }
        }
        Ok(out)
    }

    /// The most recently created request for (spec, phase).
    pub fn latest_for(&self, spec_id: &str, phase: &str) -> Result<Option<ApprovalRequest>> {
        Ok(self.list_for(spec_id, phase)?.pop())
    }

    /// Every request in the store, oldest first.
    pub fn list_all(&self) -> Result<Vec<ApprovalRequest>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(REQUESTS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            out.push(decode(v.value())?);
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Insert `candidate` unless a live pending request exists for its
    /// (spec, phase). Stale pending requests found on the way are flipped to
    /// `Expired` in the same transaction.
    pub fn insert_unless_pending(
        &self,
        candidate: ApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let prefix = spec_prefix(&candidate.spec_id, &candidate.phase);
        let end = prefix_end(&prefix);
        let wt = self.db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut index = wt.open_table(BY_SPEC).map_err(db_err)?;
            let mut requests = wt.open_table(REQUESTS).map_err(db_err)?;

            let mut ids = Vec::new();
            for entry in index
                .range(prefix.as_str()..end.as_str())
                .map_err(db_err)?
            {
                let (_, id) = entry.map_err(db_err)?;
                ids.push(id.value().to_string());
            }

            let mut existing = None;
            for id in ids {
                let bytes = requests
                    .get(id.as_str())
                    .map_err(db_err)?
                    .map(|g| g.value().to_vec());
                let Some(bytes) = bytes else { continue };
                let mut req = decode(&bytes)?;
                if req.state != ApprovalState::Pending {
                    continue;
                }
                if req.is_expired(now) {
                    req.state = ApprovalState::Expired;
                    req.decided_at = Some(now);
                    req.version += 1;
                    let data = serde_json::to_vec(&req).map_err(db_err)?;
                    requests
                        .insert(req.id.as_str(), data.as_slice())
                        .map_err(db_err)?;
                    tracing::debug!(approval_id = %req.id, "expired stale pending approval");
                } else if existing.is_none() {
                    existing = Some(req);
                }
            }

            match existing {
                Some(req) => InsertOutcome::Existing(req),
                None => {
                    let data = serde_json::to_vec(&candidate).map_err(db_err)?;
                    requests
                        .insert(candidate.id.as_str(), data.as_slice())
                        .map_err(db_err)?;
                    index
                        .insert(index_key(&candidate).as_str(), candidate.id.as_str())
                        .map_err(db_err)?;
                    InsertOutcome::Created(candidate)
                }
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(outcome)
    }

    /// Atomically read, mutate, and write one request.
    ///
    /// `mutate` runs inside the write transaction against the current stored
    /// record. If it returns an error the transaction is aborted and nothing
    /// is written. On success the record's version is bumped.
    pub fn update<T, F>(&self, id: &str, mutate: F) -> Result<(ApprovalRequest, T)>
    where
        F: FnOnce(&mut ApprovalRequest) -> Result<T>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let result = {
            let mut requests = wt.open_table(REQUESTS).map_err(db_err)?;
            let bytes = requests
                .get(id)
                .map_err(db_err)?
                .map(|g| g.value().to_vec());
            match bytes {
                None => Err(RegenError::ApprovalNotFound(id.to_string())),
                Some(bytes) => {
                    let mut req = decode(&bytes)?;
                    let read_version = req.version;
                    match mutate(&mut req) {
                        Ok(out) => {
                            req.version = read_version + 1;
                            let data = serde_json::to_vec(&req).map_err(db_err)?;
                            requests.insert(id, data.as_slice()).map_err(db_err)?;
                            Ok((req, out))
                        }
                        Err(e) => Err(e),
                    }
                }
            }
        };
        match result {
            Ok(v) => {
                wt.commit().map_err(db_err)?;
                Ok(v)
            }
            Err(e) => {
                wt.abort().map_err(db_err)?;
                Err(e)
            }
        }
    }

    /// Flip every pending request past its expiry to `Expired`.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let expired = {
            let mut requests = wt.open_table(REQUESTS).map_err(db_err)?;
            let mut stale = Vec::new();
            for entry in requests.iter().map_err(db_err)? {
                let (_, v) = entry.map_err(db_err)?;
                let req = decode(v.value())?;
                if req.state == ApprovalState::Pending && req.is_expired(now) {
                    stale.push(req);
                }
            }
            for req in &mut stale {
                req.state = ApprovalState::Expired;
                req.decided_at = Some(now);
                req.version += 1;
                let data = serde_json::to_vec(&*req).map_err(db_err)?;
                requests
                    .insert(req.id.as_str(), data.as_slice())
                    .map_err(db_err)?;
            }
            stale
        };
        wt.commit().map_err(db_err)?;
        Ok(expired)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
