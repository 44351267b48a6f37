use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reviewer id that is always eligible, used by automated approval paths.
pub const AUTO_APPROVAL_REVIEWER: &str = "auto-approval";

/// Confidence at or above which approval is recommended.
pub const RECOMMEND_APPROVE_AT: f64 = 85.0;
/// Confidence at or above which a revision (rather than rejection) is recommended.
pub const RECOMMEND_REVISION_AT: f64 = 60.0;

// ---------------------------------------------------------------------------
// ApprovalState / ApprovalStatus
// ---------------------------------------------------------------------------

/// Stored lifecycle state of a request.
///
/// Transitions: `Pending → Approved | Rejected | Expired`. Terminal states
/// never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::Expired => "expired",
        }
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a status query; `None` when no request was ever made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    None,
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl From<ApprovalState> for ApprovalStatus {
    fn from(s: ApprovalState) -> Self {
        match s {
            ApprovalState::Pending => ApprovalStatus::Pending,
            ApprovalState::Approved => ApprovalStatus::Approved,
            ApprovalState::Rejected => ApprovalStatus::Rejected,
            ApprovalState::Expired => ApprovalStatus::Expired,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::None => "none",
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    RequestRevision,
}

impl std::str::FromStr for ReviewDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ReviewDecision::Approve),
            "reject" => Ok(ReviewDecision::Reject),
            "request_revision" | "request-revision" => Ok(ReviewDecision::RequestRevision),
            _ => Err(format!(
                "unknown decision '{s}': must be approve, reject, or request_revision"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Approve,
    RequestRevision,
    Reject,
}

impl RecommendedAction {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= RECOMMEND_APPROVE_AT {
            RecommendedAction::Approve
        } else if confidence >= RECOMMEND_REVISION_AT {
            RecommendedAction::RequestRevision
        } else {
            RecommendedAction::Reject
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Snapshot of the results being judged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApprovalResults {
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
    /// Fingerprint of the content the reviewer is approving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_fingerprint: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub responded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub spec_id: String,
    pub phase: String,
    pub results: ApprovalResults,
    pub recommended_action: RecommendedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub reviewers: Vec<String>,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub responses: Vec<ApprovalResponse>,
    /// When the approved content was published. Set at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    /// Bumped on every stored mutation.
    pub version: u64,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// State as seen at `now`: a pending request past its expiry reads as
    /// expired even before the sweep has flipped it.
    pub fn effective_state(&self, now: DateTime<Utc>) -> ApprovalState {
        if self.state == ApprovalState::Pending && self.is_expired(now) {
            ApprovalState::Expired
        } else {
            self.state
        }
    }

    pub fn is_eligible(&self, reviewer_id: &str) -> bool {
        reviewer_id == AUTO_APPROVAL_REVIEWER || self.reviewers.iter().any(|r| r == reviewer_id)
    }

    /// The content body captured when the request was opened, if any.
    pub fn content_snapshot(&self) -> Option<&serde_json::Value> {
        self.results.details.get("content").filter(|v| !v.is_null())
    }

    /// Approved, carries a content snapshot, and not yet published.
    pub fn is_publishable(&self) -> bool {
        self.state == ApprovalState::Approved
            && self.applied_at.is_none()
            && self.content_snapshot().is_some()
    }

    pub fn approvals(&self) -> usize {
        self.responses
            .iter()
            .filter(|r| r.decision == ReviewDecision::Approve)
            .count()
    }
}

/// Result of a successful `submit_approval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub approval_id: String,
    pub state: ApprovalState,
    pub approvals_recorded: usize,
    pub approvals_required: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(RecommendedAction::from_confidence(85.0), RecommendedAction::Approve);
        assert_eq!(RecommendedAction::from_confidence(99.0), RecommendedAction::Approve);
        assert_eq!(
            RecommendedAction::from_confidence(84.9),
            RecommendedAction::RequestRevision
        );
        assert_eq!(
            RecommendedAction::from_confidence(60.0),
            RecommendedAction::RequestRevision
        );
        assert_eq!(RecommendedAction::from_confidence(59.9), RecommendedAction::Reject);
    }

    #[test]
    fn decision_parses_both_spellings() {
        assert_eq!(
            "request-revision".parse::<ReviewDecision>().unwrap(),
            ReviewDecision::RequestRevision
        );
        assert!("maybe".parse::<ReviewDecision>().is_err());
    }
}
