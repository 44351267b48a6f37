use crate::output::print_json;
use anyhow::Context;
use chrono::{DateTime, Utc};
use regen_core::ledger::RollbackRequest;
use std::path::Path;

pub struct RollbackArgs {
    pub page: String,
    pub at: Option<String>,
    pub dry_run: bool,
    pub reason: Option<String>,
    pub requested_by: Option<String>,
}

pub fn run(root: &Path, args: RollbackArgs, json: bool) -> anyhow::Result<()> {
    let target_timestamp = args
        .at
        .as_deref()
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("invalid --at timestamp '{s}'"))
        })
        .transpose()?;

    let pipeline = super::open_pipeline(root)?;
    let result = pipeline.ledger().rollback(RollbackRequest {
        page_id: args.page,
        target_timestamp,
        dry_run: args.dry_run,
        reason: args.reason,
        requested_by: args.requested_by,
    })?;

    if json {
        print_json(&result)?;
    } else {
        println!("{}", result.message);
        if let Some(id) = &result.pre_rollback_backup {
            println!("  previous content saved as backup {id}");
        }
    }

    if !result.success {
        anyhow::bail!("rollback of {} failed", result.page_id);
    }
    Ok(())
}
