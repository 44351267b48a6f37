use std::time::Instant;

use serde_json::json;

use super::manager::TriggerManager;
use super::outcome::PageOutcome;
use super::rule::{EventKind, PageTarget, TriggerEvent, TriggerRule};
use crate::aggregator::SlotKind;
use crate::approval::{ApprovalRequest, ApprovalResults};
use crate::error::Result;
use crate::external::{RegenerationParams, TriggerMetadata};
use crate::ledger::{AuditDetails, AuditResult, Correlation, GenerationRecord};
use crate::types::{fingerprint, ContentProvenance, Mode, PageContent};

pub(crate) const PRE_REGENERATION: &str = "pre-regeneration";

/// Per-page inputs shared by every step of one regeneration.
struct PageRun<'a> {
    rule: &'a TriggerRule,
    event: &'a TriggerEvent,
    workflow_id: &'a str,
    target: &'a PageTarget,
    mode: Mode,
    approval_phase: Option<&'a str>,
}

impl PageRun<'_> {
    fn correlation(&self) -> Correlation {
        Correlation {
            event_id: Some(self.event.id.to_string()),
            rule_id: Some(self.rule.id.clone()),
            ..Default::default()
        }
    }

    fn trigger_metadata(&self) -> TriggerMetadata {
        TriggerMetadata {
            rule_id: self.rule.id.clone(),
            event_id: self.event.id.to_string(),
            event_type: self.event.event_type.to_string(),
            source_id: self.event.source_id.clone(),
            event_timestamp: self.event.timestamp,
            event_metadata: self.event.metadata.clone(),
        }
    }
}

/// Everything needed to put one body live.
struct PageWrite {
    body: serde_json::Value,
    confidence: Option<f64>,
    source_agents: Vec<String>,
    source_tools: Vec<String>,
    details: AuditDetails,
    correlation: Correlation,
}

fn elapsed_ms(started: Instant) -> Option<u64> {
    Some(started.elapsed().as_millis() as u64)
}

impl TriggerManager {
    /// Regenerate every target page in order. One page failing does not stop
    /// the rest; the action succeeds only if no page failed.
    pub(super) async fn invoke_regeneration(
        &self,
        rule: &TriggerRule,
        event: &TriggerEvent,
        workflow_id: &str,
        pages: &[PageTarget],
        mode: Mode,
        approval_phase: Option<&str>,
    ) -> Result<(bool, String)> {
        // The event says this source just changed; drop what we cached for it.
        match event.event_type {
            EventKind::AgentCompletion => {
                self.deps
                    .aggregator
                    .invalidate(SlotKind::Agent, &event.source_id);
            }
            EventKind::ToolDataUpdate => {
                self.deps
                    .aggregator
                    .invalidate(SlotKind::Tool, &event.source_id);
            }
            EventKind::ManualTrigger | EventKind::Schedule => {}
        }

        let mut summaries = Vec::with_capacity(pages.len());
        let mut ok = true;
        for target in pages {
            let run = PageRun {
                rule,
                event,
                workflow_id,
                target,
                mode,
                approval_phase,
            };
            let outcome = match self.regenerate_page(&run).await {
                Ok(outcome) => outcome,
                Err(e) => PageOutcome::Failed(e.to_string()),
            };
            ok &= !outcome.is_failure();
            summaries.push(outcome.describe(&target.page_id));
        }
        Ok((ok, summaries.join("; ")))
    }

    /// Context → regeneration → (preview | approval gate | backup + write),
    /// with exactly one generation entry in the ledger per call.
    #[tracing::instrument(
        level = "debug",
        skip(self, run),
        fields(page_id = %run.target.page_id, rule_id = %run.rule.id, mode = %run.mode)
    )]
    async fn regenerate_page(&self, run: &PageRun<'_>) -> Result<PageOutcome> {
        let started = Instant::now();
        let page_id = run.target.page_id.as_str();
        let ledger = &self.deps.ledger;

        // An approved draft that has not gone live yet is published as
        // reviewed, whatever a fresh run would produce now.
        if let Some(phase) = run.approval_phase.filter(|_| run.mode != Mode::Preview) {
            match self.deps.approvals.latest_request(page_id, phase) {
                Ok(Some(req)) if req.is_publishable() => {
                    return self.publish_approved(run, req, started);
                }
                Ok(_) => {}
                Err(e) => {
                    let error = format!("approval lookup failed: {e}");
                    tracing::error!(page_id, %error);
                    return self.record_failure(
                        run,
                        started,
                        &error,
                        AuditDetails::default(),
                        run.correlation(),
                    );
                }
            }
        }

        let context = self
            .deps
            .aggregator
            .get_page_generation_context(page_id, run.target.tier, run.mode)
            .await;
        let source_agents: Vec<String> = context.agent_outputs.keys().cloned().collect();
        let source_tools: Vec<String> = context.tool_data.keys().cloned().collect();
        let sources: Vec<String> = source_agents
            .iter()
            .chain(source_tools.iter())
            .cloned()
            .collect();
        let mut warnings = context.warnings();

        if !context.is_complete() {
            let missing = context.missing_required_tools().join(", ");
            tracing::warn!(page_id, %missing, "generating with incomplete context");
            ledger.log_validation(
                page_id,
                run.mode,
                AuditResult::Warning,
                AuditDetails {
                    warnings: warnings.clone(),
                    message: Some(format!("required tools unavailable: {missing}")),
                    ..Default::default()
                },
                run.correlation(),
            )?;
        }

        let params = RegenerationParams {
            page_id: page_id.to_string(),
            tier: run.target.tier,
            mode: run.mode,
            context,
        };
        let result = self
            .deps
            .regenerator
            .run_regeneration(run.workflow_id, &params, &run.trigger_metadata())
            .await;

        let run_result = match result {
            Ok(r) => r,
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(page_id, %error, "regeneration call failed");
                let details = AuditDetails {
                    sources,
                    warnings,
                    ..Default::default()
                };
                return self.record_failure(run, started, &error, details, run.correlation());
            }
        };
        warnings.extend(run_result.warnings.iter().cloned());
        let correlation = Correlation {
            run_id: run_result.run_id.clone(),
            ..run.correlation()
        };
        let body = match (&run_result.content, run_result.success) {
            (Some(body), true) => body.clone(),
            _ => {
                let error = run_result
                    .error
                    .clone()
                    .unwrap_or_else(|| "regeneration returned no content".to_string());
                tracing::warn!(page_id, %error, "regeneration reported failure");
                let details = AuditDetails {
                    sources,
                    warnings,
                    ..Default::default()
                };
                return self.record_failure(run, started, &error, details, correlation);
            }
        };

        let new_fingerprint = fingerprint(&body);
        let mut details = AuditDetails {
            new_fingerprint: Some(new_fingerprint.clone()),
            confidence: run_result.confidence,
            sources,
            warnings,
            ..Default::default()
        };

        // Preview: record what would have been written, touch nothing.
        if run.mode == Mode::Preview {
            details.duration_ms = elapsed_ms(started);
            details.message = Some("preview only; live content untouched".to_string());
            ledger.log_content_generation(GenerationRecord {
                page_id: page_id.to_string(),
                mode: Mode::Preview,
                result: AuditResult::Success,
                details,
                correlation,
            })?;
            return Ok(PageOutcome::Previewed);
        }

        let current = match ledger.content().read_content(page_id) {
            Ok(current) => current,
            Err(e) => {
                let error = format!("reading live content failed: {e}");
                tracing::error!(page_id, %error);
                return self.record_failure(run, started, &error, details, correlation);
            }
        };
        details.previous_fingerprint = current.as_ref().map(PageContent::fingerprint);

        // Approval gate: hold the draft until a reviewer approves it.
        if let Some(phase) = run.approval_phase {
            let results = ApprovalResults {
                confidence: run_result.confidence.unwrap_or(0.0),
                summary: format!("{} regenerated {page_id}", run.workflow_id),
                content_fingerprint: Some(new_fingerprint),
                details: json!({
                    "rule_id": run.rule.id,
                    "event_id": run.event.id.to_string(),
                    "run_id": run_result.run_id,
                    "warnings": details.warnings,
                    "source_agents": source_agents,
                    "source_tools": source_tools,
                    "content": body,
                }),
            };
            let requested = self
                .deps
                .approvals
                .request_approval(
                    page_id,
                    phase,
                    results,
                    Some(format!("triggered by {}", run.event.provenance_tag())),
                )
                .await;
            let approval_id = match requested {
                Ok(id) => id,
                Err(e) => {
                    let error = format!("approval request failed: {e}");
                    tracing::error!(page_id, %error);
                    return self.record_failure(run, started, &error, details, correlation);
                }
            };
            details.duration_ms = elapsed_ms(started);
            details.message = Some(format!("awaiting approval {approval_id} ({phase})"));
            ledger.log_content_generation(GenerationRecord {
                page_id: page_id.to_string(),
                mode: run.mode,
                result: AuditResult::Skipped,
                details,
                correlation: Correlation {
                    approval_id: Some(approval_id.clone()),
                    ..correlation
                },
            })?;
            tracing::info!(page_id, %approval_id, phase, "write held for approval");
            return Ok(PageOutcome::AwaitingApproval(approval_id));
        }

        self.write_page(
            run,
            started,
            current,
            PageWrite {
                body,
                confidence: run_result.confidence,
                source_agents,
                source_tools,
                details,
                correlation,
            },
        )
    }

    /// Put an approved snapshot live and mark its request applied.
    fn publish_approved(
        &self,
        run: &PageRun<'_>,
        req: ApprovalRequest,
        started: Instant,
    ) -> Result<PageOutcome> {
        let page_id = run.target.page_id.as_str();
        let snapshot = &req.results.details;
        let strings = |key: &str| -> Vec<String> {
            snapshot
                .get(key)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default()
        };
        let source_agents = strings("source_agents");
        let source_tools = strings("source_tools");
        let body = req.content_snapshot().cloned().unwrap_or_default();
        let correlation = Correlation {
            run_id: snapshot
                .get("run_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            approval_id: Some(req.id.clone()),
            ..run.correlation()
        };
        let mut details = AuditDetails {
            new_fingerprint: Some(fingerprint(&body)),
            confidence: Some(req.results.confidence),
            sources: source_agents.iter().chain(source_tools.iter()).cloned().collect(),
            warnings: strings("warnings"),
            message: Some(format!("publishing approved draft {}", req.id)),
            ..Default::default()
        };

        let current = match self.deps.ledger.content().read_content(page_id) {
            Ok(current) => current,
            Err(e) => {
                let error = format!("reading live content failed: {e}");
                tracing::error!(page_id, %error);
                return self.record_failure(run, started, &error, details, correlation);
            }
        };
        details.previous_fingerprint = current.as_ref().map(PageContent::fingerprint);

        let outcome = self.write_page(
            run,
            started,
            current,
            PageWrite {
                body,
                confidence: Some(req.results.confidence),
                source_agents,
                source_tools,
                details,
                correlation,
            },
        )?;
        if !outcome.is_failure() {
            if let Err(e) = self.deps.approvals.mark_applied(&req.id) {
                tracing::warn!(page_id, approval_id = %req.id, error = %e, "could not mark approval applied");
            }
        }
        Ok(outcome)
    }

    /// Snapshot what is live, then replace it. Without a backup we do not
    /// overwrite. Logs the single generation entry for this attempt.
    fn write_page(
        &self,
        run: &PageRun<'_>,
        started: Instant,
        current: Option<PageContent>,
        write: PageWrite,
    ) -> Result<PageOutcome> {
        let page_id = run.target.page_id.as_str();
        let ledger = &self.deps.ledger;
        let PageWrite {
            body,
            confidence,
            source_agents,
            source_tools,
            mut details,
            mut correlation,
        } = write;

        if let Some(live) = &current {
            match ledger.create_backup(page_id, live, PRE_REGENERATION) {
                Ok(backup) => correlation.backup_id = Some(backup.header.backup_id),
                Err(e) => {
                    let error = format!("pre-regeneration backup failed: {e}");
                    tracing::error!(page_id, %error, "not overwriting without a backup");
                    return self.record_failure(run, started, &error, details, correlation);
                }
            }
        }

        let page = PageContent {
            page_id: page_id.to_string(),
            body,
            provenance: ContentProvenance {
                last_updated: Some(self.deps.clock.now()),
                confidence,
                source_agents,
                source_tools,
                trigger: Some(run.event.provenance_tag()),
                restored_from: None,
            },
        };
        if let Err(e) = ledger.content().write_content(&page) {
            let error = format!("content write failed: {e}");
            tracing::error!(page_id, %error);
            return self.record_failure(run, started, &error, details, correlation);
        }

        details.duration_ms = elapsed_ms(started);
        let entry = ledger.log_content_generation(GenerationRecord {
            page_id: page_id.to_string(),
            mode: run.mode,
            result: AuditResult::Success,
            details,
            correlation,
        })?;
        tracing::info!(page_id, operation = %entry.operation, "page regenerated");
        Ok(PageOutcome::Written(entry.operation))
    }

    fn record_failure(
        &self,
        run: &PageRun<'_>,
        started: Instant,
        error: &str,
        mut details: AuditDetails,
        correlation: Correlation,
    ) -> Result<PageOutcome> {
        details.error = Some(error.to_string());
        details.duration_ms = elapsed_ms(started);
        self.deps.ledger.log_content_generation(GenerationRecord {
            page_id: run.target.page_id.clone(),
            mode: run.mode,
            result: AuditResult::Failure,
            details,
            correlation,
        })?;
        Ok(PageOutcome::Failed(error.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
