use crate::output::print_json;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let pipeline = super::open_pipeline(root)?;
    let report = pipeline.ledger().cleanup()?;
    let expired = pipeline.approvals().cleanup_expired_approvals()?;

    if json {
        print_json(&serde_json::json!({
            "log_partitions_removed": report.log_partitions_removed,
            "backups_removed": report.backups_removed,
            "empty_dirs_removed": report.empty_dirs_removed,
            "approvals_expired": expired,
        }))?;
    } else {
        println!(
            "Removed {} audit partition(s), {} backup(s), {} empty dir(s); expired {} approval(s).",
            report.log_partitions_removed,
            report.backups_removed,
            report.empty_dirs_removed,
            expired
        );
    }
    Ok(())
}
