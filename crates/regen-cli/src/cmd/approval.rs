use crate::output::{opt, print_json, print_table, ts};
use anyhow::Context;
use clap::Subcommand;
use regen_core::approval::{ApprovalResults, ApprovalSubmission, ReviewDecision};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ApprovalSubcommand {
    /// Open a review for a spec and phase (returns the pending one if open)
    Request {
        spec: String,
        phase: String,
        /// Confidence of the results under review (0-100)
        #[arg(long)]
        confidence: f64,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show the current status for a spec and phase
    Status { spec: String, phase: String },

    /// Show one approval request in full
    Show { id: String },

    /// Record a reviewer's decision
    Submit {
        id: String,
        #[arg(long)]
        reviewer: String,
        /// approve, reject, or request_revision
        #[arg(long)]
        decision: ReviewDecision,
        #[arg(long)]
        feedback: Option<String>,
    },

    /// List requests awaiting a decision
    Pending,

    /// Mark stale pending requests as expired
    Cleanup,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ApprovalSubcommand, json: bool) -> anyhow::Result<()> {
    let pipeline = super::open_pipeline(root)?;
    let gate = pipeline.approvals();

    match subcmd {
        ApprovalSubcommand::Request {
            spec,
            phase,
            confidence,
            summary,
            reason,
        } => {
            let results = ApprovalResults {
                confidence,
                summary,
                ..Default::default()
            };
            let id = super::runtime()?
                .block_on(gate.request_approval(&spec, &phase, results, reason))
                .with_context(|| format!("failed to request approval for {spec} ({phase})"))?;
            if json {
                print_json(&serde_json::json!({ "approval_id": id }))?;
            } else {
                println!("{id}");
            }
        }

        ApprovalSubcommand::Status { spec, phase } => {
            let status = gate.get_approval_status(&spec, &phase)?;
            if json {
                print_json(&serde_json::json!({
                    "spec_id": spec,
                    "phase": phase,
                    "status": status,
                }))?;
            } else {
                println!("{status}");
            }
        }

        ApprovalSubcommand::Show { id } => {
            let req = gate.get_approval(&id)?;
            if json {
                print_json(&req)?;
                return Ok(());
            }
            println!("Approval:    {}", req.id);
            println!("Spec:        {} ({})", req.spec_id, req.phase);
            println!("State:       {}", req.state);
            println!("Confidence:  {}", req.results.confidence);
            println!("Recommended: {:?}", req.recommended_action);
            println!("Created:     {}", ts(req.created_at));
            println!("Expires:     {}", ts(req.expires_at));
            if let Some(reason) = &req.reason {
                println!("Reason:      {reason}");
            }
            if !req.results.summary.is_empty() {
                println!("Summary:     {}", req.results.summary);
            }
            println!("Reviewers:   {}", req.reviewers.join(", "));
            if !req.responses.is_empty() {
                println!();
                let rows = req
                    .responses
                    .iter()
                    .map(|r| {
                        vec![
                            r.reviewer_id.clone(),
                            format!("{:?}", r.decision).to_lowercase(),
                            ts(r.responded_at),
                            opt(r.feedback.clone()),
                        ]
                    })
                    .collect();
                print_table(&["REVIEWER", "DECISION", "AT", "FEEDBACK"], rows);
            }
        }

        ApprovalSubcommand::Submit {
            id,
            reviewer,
            decision,
            feedback,
        } => {
            let mut submission = ApprovalSubmission::new(reviewer, decision);
            if let Some(feedback) = feedback {
                submission = submission.with_feedback(feedback);
            }
            let outcome = super::runtime()?.block_on(gate.submit_approval(&id, submission))?;
            if json {
                print_json(&outcome)?;
            } else {
                println!("{}", outcome.message);
            }
        }

        ApprovalSubcommand::Pending => {
            let pending = gate.list_pending()?;
            if json {
                print_json(&pending)?;
                return Ok(());
            }
            if pending.is_empty() {
                println!("No pending approvals.");
                return Ok(());
            }
            let rows = pending
                .iter()
                .map(|r| {
                    vec![
                        r.id.clone(),
                        r.spec_id.clone(),
                        r.phase.clone(),
                        format!("{}/{}", r.approvals(), r.reviewers.len()),
                        ts(r.expires_at),
                    ]
                })
                .collect();
            print_table(&["ID", "SPEC", "PHASE", "APPROVALS", "EXPIRES"], rows);
        }

        ApprovalSubcommand::Cleanup => {
            let expired = gate.cleanup_expired_approvals()?;
            if json {
                print_json(&serde_json::json!({ "expired": expired }))?;
            } else {
                println!("Expired {expired} approval request(s).");
            }
        }
    }

    Ok(())
}
