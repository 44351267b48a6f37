use crate::output::{opt, print_json, print_table, ts};
use clap::Subcommand;
use regen_core::ledger::{AuditLogEntry, AuditQuery};
use std::path::Path;

#[derive(Subcommand)]
pub enum AuditSubcommand {
    /// Entries for one page, newest first
    Page {
        page: String,
        #[arg(long, default_value = "7")]
        days: u32,
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Entries for every page, newest first
    Recent {
        #[arg(long, default_value = "7")]
        days: u32,
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Aggregate counts and averages over a window
    Stats {
        #[arg(long, default_value = "7")]
        days: u32,
    },
}

pub fn run(root: &Path, subcmd: AuditSubcommand, json: bool) -> anyhow::Result<()> {
    let pipeline = super::open_pipeline(root)?;
    let ledger = pipeline.ledger();

    match subcmd {
        AuditSubcommand::Page { page, days, limit } => {
            let query = AuditQuery {
                days,
                limit: Some(limit),
            };
            print_entries(&ledger.get_page_audit_logs(&page, query)?, json)
        }
        AuditSubcommand::Recent { days, limit } => {
            let query = AuditQuery {
                days,
                limit: Some(limit),
            };
            print_entries(&ledger.get_recent_audit_logs(query)?, json)
        }
        AuditSubcommand::Stats { days } => {
            let stats = ledger.get_audit_stats(days)?;
            if json {
                return print_json(&stats);
            }
            println!("Period:          last {} day(s)", stats.period_days);
            println!("Entries:         {}", stats.total_entries);
            println!("Pages touched:   {}", stats.pages_touched);
            println!(
                "Avg confidence:  {}",
                opt(stats.average_confidence.map(|c| format!("{c:.1}")))
            );
            println!(
                "Avg duration:    {}",
                opt(stats.average_duration_ms.map(|d| format!("{d:.0}ms")))
            );
            for (op, n) in &stats.by_operation {
                println!("  {op:<12} {n}");
            }
            for (result, n) in &stats.by_result {
                println!("  {result:<12} {n}");
            }
            if !stats.recent_failures.is_empty() {
                println!();
                println!("Recent failures:");
                print_entries(&stats.recent_failures, false)?;
            }
            Ok(())
        }
    }
}

fn print_entries(entries: &[AuditLogEntry], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            let note = e
                .details
                .error
                .clone()
                .or_else(|| e.details.message.clone());
            vec![
                ts(e.timestamp),
                e.operation.to_string(),
                e.page_id.clone(),
                e.mode.to_string(),
                e.result.to_string(),
                opt(e.details.confidence),
                opt(note),
            ]
        })
        .collect();
    print_table(
        &["TIME", "OPERATION", "PAGE", "MODE", "RESULT", "CONFIDENCE", "NOTE"],
        rows,
    );
    Ok(())
}
