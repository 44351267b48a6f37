use crate::output::{opt, print_json, print_table, ts};
use anyhow::Context;
use clap::Subcommand;
use regen_core::store::ContentStore;
use std::path::Path;

#[derive(Subcommand)]
pub enum BackupSubcommand {
    /// List a page's backups, newest first
    List { page: String },

    /// Snapshot a page's live content
    Create {
        page: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
}

pub fn run(root: &Path, subcmd: BackupSubcommand, json: bool) -> anyhow::Result<()> {
    let pipeline = super::open_pipeline(root)?;
    let ledger = pipeline.ledger();

    match subcmd {
        BackupSubcommand::List { page } => {
            let backups = ledger.list_backups(&page)?;
            if json {
                let headers: Vec<_> = backups.iter().map(|b| &b.header).collect();
                return print_json(&headers);
            }
            if backups.is_empty() {
                println!("No backups for {page}.");
                return Ok(());
            }
            let rows = backups
                .iter()
                .map(|b| {
                    vec![
                        b.header.backup_id.clone(),
                        b.header.created_at.to_rfc3339(),
                        b.header.reason.clone(),
                        opt(b.header.confidence),
                    ]
                })
                .collect();
            print_table(&["ID", "CREATED", "REASON", "CONFIDENCE"], rows);
        }

        BackupSubcommand::Create { page, reason } => {
            let content = ledger
                .content()
                .read_content(&page)?
                .with_context(|| format!("page '{page}' has no live content"))?;
            let backup = ledger.create_backup(&page, &content, &reason)?;
            if json {
                print_json(&backup.header)?;
            } else {
                println!(
                    "created backup {} at {}",
                    backup.header.backup_id,
                    ts(backup.header.created_at)
                );
            }
        }
    }

    Ok(())
}
