//! Review gate for regeneration attempts.
//!
//! One request per (spec id, phase) may be pending at a time. A request moves
//! `pending → approved | rejected | expired` exactly once; every transition
//! is a single conditional update against [`db::ApprovalDb`].

pub mod db;
pub mod model;

use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ApprovalConfig;
use crate::error::{RegenError, Result};
use crate::external::{Notification, Notifier};
use crate::paths;
use crate::types::Severity;

use db::{ApprovalDb, InsertOutcome};
pub use model::{
    ApprovalRequest, ApprovalResponse, ApprovalResults, ApprovalState, ApprovalStatus,
    RecommendedAction, ReviewDecision, SubmitOutcome, AUTO_APPROVAL_REVIEWER,
};

/// A reviewer's answer, as handed to [`ApprovalGate::submit_approval`].
#[derive(Debug, Clone)]
pub struct ApprovalSubmission {
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    pub feedback: Option<String>,
}

impl ApprovalSubmission {
    pub fn new(reviewer_id: impl Into<String>, decision: ReviewDecision) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            decision,
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}

pub struct ApprovalGate {
    db: ApprovalDb,
    config: ApprovalConfig,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ApprovalGate {
    pub fn new(
        db: ApprovalDb,
        config: ApprovalConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            config,
            notifier,
            clock,
        }
    }

    pub fn open(
        path: &Path,
        config: ApprovalConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::new(ApprovalDb::open(path)?, config, notifier, clock))
    }

    fn approvals_required(&self) -> usize {
        if self.config.dual_approval {
            2
        } else {
            1
        }
    }

    /// Open a review for (spec, phase), or return the id of the one already
    /// pending.
    #[tracing::instrument(level = "debug", skip(self, results, reason))]
    pub async fn request_approval(
        &self,
        spec_id: &str,
        phase: &str,
        results: ApprovalResults,
        reason: Option<String>,
    ) -> Result<String> {
        paths::validate_id(spec_id)?;
        if phase.trim().is_empty() {
            return Err(RegenError::InvalidId(phase.to_string()));
        }

        let now = self.clock.now();
        let reviewers = self.config.reviewers_for(phase);
        let candidate = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            spec_id: spec_id.to_string(),
            phase: phase.to_string(),
            recommended_action: RecommendedAction::from_confidence(results.confidence),
            results,
            reason,
            reviewers,
            state: ApprovalState::Pending,
            created_at: now,
            expires_at: now + Duration::hours(i64::from(self.config.expiry_hours)),
            decided_at: None,
            responses: Vec::new(),
            applied_at: None,
            version: 0,
        };

        let created = match self.db.insert_unless_pending(candidate, now)? {
            InsertOutcome::Existing(existing) => {
                tracing::debug!(approval_id = %existing.id, "approval already pending");
                return Ok(existing.id);
            }
            InsertOutcome::Created(req) => req,
        };

        tracing::info!(
            approval_id = %created.id,
            spec_id,
            phase,
            recommended = ?created.recommended_action,
            "approval requested"
        );

        if created.reviewers.is_empty() {
            tracing::warn!(
                approval_id = %created.id,
                phase,
                "no reviewers configured for phase; only auto-approval can decide"
            );
        } else {
            self.send(Notification {
                recipients: created.reviewers.clone(),
                message: format!("Review requested for {spec_id} ({phase})"),
                severity: Severity::Info,
                metadata: json!({
                    "approval_id": created.id,
                    "confidence": created.results.confidence,
                    "recommended_action": created.recommended_action,
                    "expires_at": created.expires_at,
                }),
            })
            .await;
        }

        Ok(created.id)
    }

    /// Record one reviewer's decision.
    ///
    /// The expiry, eligibility, and duplicate checks run inside the same
    /// write transaction that stores the response, so two concurrent
    /// approvals cannot both be counted against a stale pre-image.
    #[tracing::instrument(level = "debug", skip(self, submission), fields(reviewer = %submission.reviewer_id))]
    pub async fn submit_approval(
        &self,
        approval_id: &str,
        submission: ApprovalSubmission,
    ) -> Result<SubmitOutcome> {
        let now = self.clock.now();
        let required = self.approvals_required();
        let ApprovalSubmission {
            reviewer_id,
            decision,
            feedback,
        } = submission;

        let (req, transitioned) = self.db.update(approval_id, |req| {
            if req.state == ApprovalState::Expired || req.is_expired(now) {
                return Err(RegenError::ApprovalExpired(req.id.clone()));
            }
            if req.state.is_terminal() {
                return Err(RegenError::AlreadyDecided {
                    id: req.id.clone(),
                    status: req.state.to_string(),
                });
            }
            if !req.is_eligible(&reviewer_id) {
                return Err(RegenError::ReviewerNotEligible {
                    reviewer: reviewer_id.clone(),
                    approval_id: req.id.clone(),
                });
            }
            if req.responses.iter().any(|r| r.reviewer_id == reviewer_id) {
                return Err(RegenError::DuplicateResponse {
                    reviewer: reviewer_id.clone(),
                    approval_id: req.id.clone(),
                });
            }

            req.responses.push(ApprovalResponse {
                reviewer_id: reviewer_id.clone(),
                decision,
                feedback: feedback.clone(),
                responded_at: now,
            });

            let next = match decision {
                ReviewDecision::Reject | ReviewDecision::RequestRevision => ApprovalState::Rejected,
                ReviewDecision::Approve if req.approvals() >= required => ApprovalState::Approved,
                ReviewDecision::Approve => ApprovalState::Pending,
            };
            if next.is_terminal() {
                req.state = next;
                req.decided_at = Some(now);
                Ok(true)
            } else {
                Ok(false)
            }
        })?;

        let approvals_recorded = req.approvals();
        let message = match req.state {
            ApprovalState::Pending => format!(
                "approval recorded ({approvals_recorded}/{required}); awaiting another reviewer"
            ),
            state => format!("approval {state} by {reviewer_id}"),
        };
        tracing::info!(approval_id, state = %req.state, approvals_recorded, "approval response recorded");

        if transitioned {
            let severity = match req.state {
                ApprovalState::Approved => Severity::Info,
                _ => Severity::Warning,
            };
            let mut recipients = req.reviewers.clone();
            recipients.retain(|r| r != &reviewer_id);
            if recipients.is_empty() {
                recipients.push(reviewer_id.clone());
            }
            self.send(Notification {
                recipients,
                message: format!("{} ({}) was {}", req.spec_id, req.phase, req.state),
                severity,
                metadata: json!({
                    "approval_id": req.id,
                    "decided_by": reviewer_id,
                    "feedback": feedback,
                }),
            })
            .await;
        }

        Ok(SubmitOutcome {
            approval_id: req.id,
            state: req.state,
            approvals_recorded,
            approvals_required: required,
            message,
        })
    }

    /// Status of the most recently created request for (spec, phase).
    /// Absence is `ApprovalStatus::None`, not an error.
    pub fn get_approval_status(&self, spec_id: &str, phase: &str) -> Result<ApprovalStatus> {
        let now = self.clock.now();
        Ok(self
            .db
            .latest_for(spec_id, phase)?
            .map(|req| ApprovalStatus::from(req.effective_state(now)))
            .unwrap_or(ApprovalStatus::None))
    }

    pub fn latest_request(&self, spec_id: &str, phase: &str) -> Result<Option<ApprovalRequest>> {
        self.db.latest_for(spec_id, phase)
    }

    pub fn get_approval(&self, approval_id: &str) -> Result<ApprovalRequest> {
        self.db
            .get(approval_id)?
            .ok_or_else(|| RegenError::ApprovalNotFound(approval_id.to_string()))
    }

    /// Requests still awaiting a decision, oldest first. Requests past their
    /// expiry are excluded even if the sweep has not flipped them yet.
    pub fn list_pending(&self) -> Result<Vec<ApprovalRequest>> {
        let now = self.clock.now();
        Ok(self
            .db
            .list_all()?
            .into_iter()
            .filter(|r| r.effective_state(now) == ApprovalState::Pending)
            .collect())
    }

    /// Record that an approved request's content has been published. A
    /// request can be applied once; a second call fails with `AlreadyDecided`.
    pub fn mark_applied(&self, approval_id: &str) -> Result<ApprovalRequest> {
        let now = self.clock.now();
        let (req, ()) = self.db.update(approval_id, |req| {
            if req.applied_at.is_some() {
                return Err(RegenError::AlreadyDecided {
                    id: req.id.clone(),
                    status: "applied".to_string(),
                });
            }
            if req.state != ApprovalState::Approved {
                return Err(RegenError::AlreadyDecided {
                    id: req.id.clone(),
                    status: req.state.to_string(),
                });
            }
            req.applied_at = Some(now);
            Ok(())
        })?;
        tracing::info!(approval_id, spec_id = %req.spec_id, "approved content applied");
        Ok(req)
    }

    /// Flip every stale pending request to expired. Returns how many changed.
    pub fn cleanup_expired_approvals(&self) -> Result<usize> {
        let expired = self.db.expire_stale(self.clock.now())?;
        for req in &expired {
            tracing::info!(approval_id = %req.id, spec_id = %req.spec_id, phase = %req.phase, "approval expired");
        }
        Ok(expired.len())
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(error = %e, "approval notification failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::RecordingNotifier;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        gate: ApprovalGate,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
    }

    fn config(dual: bool) -> ApprovalConfig {
        let mut reviewers = BTreeMap::new();
        reviewers.insert(
            "content-editor".to_string(),
            vec!["alice".to_string(), "bob".to_string()],
        );
        reviewers.insert("content-lead".to_string(), vec!["carol".to_string()]);
        ApprovalConfig {
            dual_approval: dual,
            reviewers,
            ..Default::default()
        }
    }

    fn harness_with(dual: bool, notifier: RecordingNotifier) -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap(),
        ));
        let notifier = Arc::new(notifier);
        let gate = ApprovalGate::open(
            &dir.path().join("approvals.redb"),
            config(dual),
            notifier.clone(),
            clock.clone(),
        )
        .unwrap();
        Harness {
            _dir: dir,
            gate,
            clock,
            notifier,
        }
    }

    fn harness(dual: bool) -> Harness {
        harness_with(dual, RecordingNotifier::default())
    }

    fn results(confidence: f64) -> ApprovalResults {
        ApprovalResults {
            confidence,
            summary: "refresh".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn second_request_returns_pending_id() {
        let h = harness(false);
        let a = h
            .gate
            .request_approval("strategy-plans", "draft", results(90.0), None)
            .await
            .unwrap();
        let b = h
            .gate
            .request_approval("strategy-plans", "draft", results(40.0), Some("again".into()))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(h.notifier.sent().len(), 1);

        let req = h.gate.get_approval(&a).unwrap();
        assert_eq!(req.recommended_action, RecommendedAction::Approve);
        assert_eq!(req.reviewers, vec!["alice", "bob"]);
        assert_eq!(req.expires_at - req.created_at, Duration::hours(72));
    }

    #[tokio::test]
    async fn new_request_after_terminal_transition() {
        let h = harness(false);
        let a = h
            .gate
            .request_approval("strategy-plans", "draft", results(70.0), None)
            .await
            .unwrap();
        h.gate
            .submit_approval(&a, ApprovalSubmission::new("alice", ReviewDecision::Reject))
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(1));
        let b = h
            .gate
            .request_approval("strategy-plans", "draft", results(70.0), None)
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(
            h.gate.get_approval_status("strategy-plans", "draft").unwrap(),
            ApprovalStatus::Pending
        );
    }

    #[tokio::test]
    async fn status_is_none_without_requests() {
        let h = harness(false);
        assert_eq!(
            h.gate.get_approval_status("nothing", "draft").unwrap(),
            ApprovalStatus::None
        );
    }

    #[tokio::test]
    async fn single_approval_decides() {
        let h = harness(false);
        let id = h
            .gate
            .request_approval("strategy-plans", "draft", results(88.0), None)
            .await
            .unwrap();
        let out = h
            .gate
            .submit_approval(
                &id,
                ApprovalSubmission::new("bob", ReviewDecision::Approve).with_feedback("lgtm"),
            )
            .await
            .unwrap();
        assert_eq!(out.state, ApprovalState::Approved);
        assert_eq!(
            h.gate.get_approval_status("strategy-plans", "draft").unwrap(),
            ApprovalStatus::Approved
        );
        // request + decision
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn revision_request_rejects() {
        let h = harness(false);
        let id = h
            .gate
            .request_approval("strategy-plans", "draft", results(65.0), None)
            .await
            .unwrap();
        let out = h
            .gate
            .submit_approval(&id, ApprovalSubmission::new("alice", ReviewDecision::RequestRevision))
            .await
            .unwrap();
        assert_eq!(out.state, ApprovalState::Rejected);
    }

    #[tokio::test]
    async fn dual_approval_needs_two_distinct_reviewers() {
        let h = harness(true);
        let id = h
            .gate
            .request_approval("strategy-plans", "publish", results(90.0), None)
            .await
            .unwrap();

        let first = h
            .gate
            .submit_approval(&id, ApprovalSubmission::new("alice", ReviewDecision::Approve))
            .await
            .unwrap();
        assert_eq!(first.state, ApprovalState::Pending);
        assert_eq!(first.approvals_recorded, 1);
        assert_eq!(first.approvals_required, 2);

        let dup = h
            .gate
            .submit_approval(&id, ApprovalSubmission::new("alice", ReviewDecision::Approve))
            .await
            .unwrap_err();
        assert!(matches!(dup, RegenError::DuplicateResponse { .. }));

        let second = h
            .gate
            .submit_approval(&id, ApprovalSubmission::new("carol", ReviewDecision::Approve))
            .await
            .unwrap();
        assert_eq!(second.state, ApprovalState::Approved);

        let late = h
            .gate
            .submit_approval(&id, ApprovalSubmission::new("bob", ReviewDecision::Reject))
            .await
            .unwrap_err();
        assert!(matches!(late, RegenError::AlreadyDecided { .. }));
    }

    #[tokio::test]
    async fn ineligible_reviewer_is_rejected_and_nothing_stored() {
        let h = harness(false);
        let id = h
            .gate
            .request_approval("strategy-plans", "draft", results(90.0), None)
            .await
            .unwrap();
        let err = h
            .gate
            .submit_approval(&id, ApprovalSubmission::new("mallory", ReviewDecision::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, RegenError::ReviewerNotEligible { .. }));
        assert!(err.is_validation());
        let req = h.gate.get_approval(&id).unwrap();
        assert!(req.responses.is_empty());
        assert_eq!(req.version, 0);
    }

    #[tokio::test]
    async fn auto_approval_is_always_eligible() {
        let h = harness(false);
        let id = h
            .gate
            .request_approval("strategy-plans", "unconfigured-phase", results(95.0), None)
            .await
            .unwrap();
        // No reviewers for this phase, so no request notification.
        assert!(h.notifier.sent().is_empty());
        let out = h
            .gate
            .submit_approval(
                &id,
                ApprovalSubmission::new(AUTO_APPROVAL_REVIEWER, ReviewDecision::Approve),
            )
            .await
            .unwrap();
        assert_eq!(out.state, ApprovalState::Approved);
    }

    #[tokio::test]
    async fn expired_request_refuses_every_reviewer() {
        let h = harness(false);
        let id = h
            .gate
            .request_approval("strategy-plans", "draft", results(90.0), None)
            .await
            .unwrap();
        h.clock.advance(Duration::hours(72) + Duration::seconds(1));

        for reviewer in ["alice", "mallory", AUTO_APPROVAL_REVIEWER] {
            let err = h
                .gate
                .submit_approval(&id, ApprovalSubmission::new(reviewer, ReviewDecision::Approve))
                .await
                .unwrap_err();
            assert!(matches!(err, RegenError::ApprovalExpired(_)), "{reviewer}: {err}");
        }
        assert_eq!(
            h.gate.get_approval_status("strategy-plans", "draft").unwrap(),
            ApprovalStatus::Expired
        );
        assert!(h.gate.list_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exactly_at_expiry_is_still_open() {
        let h = harness(false);
        let id = h
            .gate
            .request_approval("strategy-plans", "draft", results(90.0), None)
            .await
            .unwrap();
        h.clock.advance(Duration::hours(72));
        let out = h
            .gate
            .submit_approval(&id, ApprovalSubmission::new("alice", ReviewDecision::Approve))
            .await
            .unwrap();
        assert_eq!(out.state, ApprovalState::Approved);
    }

    #[tokio::test]
    async fn cleanup_counts_once() {
        let h = harness(false);
        for spec in ["a", "b"] {
            h.gate
                .request_approval(spec, "draft", results(90.0), None)
                .await
                .unwrap();
        }
        h.clock.advance(Duration::hours(73));
        h.gate
            .request_approval("c", "draft", results(90.0), None)
            .await
            .unwrap();

        assert_eq!(h.gate.list_pending().unwrap().len(), 1);
        assert_eq!(h.gate.cleanup_expired_approvals().unwrap(), 2);
        assert_eq!(h.gate.cleanup_expired_approvals().unwrap(), 0);
        assert_eq!(h.gate.get_approval_status("a", "draft").unwrap(), ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn missing_approval_is_not_found() {
        let h = harness(false);
        let err = h
            .gate
            .submit_approval("nope", ApprovalSubmission::new("alice", ReviewDecision::Approve))
            .await
            .unwrap_err();
        assert!(matches!(err, RegenError::ApprovalNotFound(_)));
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_request() {
        let h = harness_with(false, RecordingNotifier::failing());
        let id = h
            .gate
            .request_approval("strategy-plans", "draft", results(90.0), None)
            .await
            .unwrap();
        assert_eq!(h.gate.get_approval(&id).unwrap().state, ApprovalState::Pending);
    }

    #[tokio::test]
    async fn applied_once_only() {
        let h = harness(false);
        let id = h
            .gate
            .request_approval("strategy-plans", "draft", results(90.0), None)
            .await
            .unwrap();
        let err = h.gate.mark_applied(&id).unwrap_err();
        assert!(matches!(err, RegenError::AlreadyDecided { .. }));

        h.gate
            .submit_approval(&id, ApprovalSubmission::new("alice", ReviewDecision::Approve))
            .await
            .unwrap();
        let req = h.gate.mark_applied(&id).unwrap();
        assert!(req.applied_at.is_some());
        assert!(matches!(
            h.gate.mark_applied(&id).unwrap_err(),
            RegenError::AlreadyDecided { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_dual_approvals_both_count() {
        let h = harness(true);
        let id = h
            .gate
            .request_approval("strategy-plans", "publish", results(90.0), None)
            .await
            .unwrap();
        let Harness {
            _dir,
            gate,
            notifier,
            ..
        } = h;
        let gate = Arc::new(gate);

        let tasks: Vec<_> = ["alice", "carol"]
            .into_iter()
            .map(|reviewer| {
                let gate = gate.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    gate.submit_approval(&id, ApprovalSubmission::new(reviewer, ReviewDecision::Approve))
                        .await
                })
            })
            .collect();
        let outcomes: Vec<SubmitOutcome> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let approved = outcomes
            .iter()
            .filter(|o| o.state == ApprovalState::Approved)
            .count();
        assert_eq!(approved, 1);

        let req = gate.get_approval(&id).unwrap();
        assert_eq!(req.state, ApprovalState::Approved);
        assert_eq!(req.responses.len(), 2);
        assert_eq!(req.version, 2);
        // request + exactly one decision
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn invalid_spec_id_is_rejected() {
        let h = harness(false);
        let err = h
            .gate
            .request_approval("Bad Id", "draft", results(90.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegenError::InvalidId(_)));
    }
}
