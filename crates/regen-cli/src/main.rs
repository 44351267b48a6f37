mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    approval::ApprovalSubcommand, audit::AuditSubcommand, backup::BackupSubcommand,
    config::ConfigSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "regen",
    about = "Event-driven content regeneration: triggers, approvals, audit and rollback",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .regen/ or .git/)
    #[arg(long, global = true, env = "REGEN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .regen/ in the current project
    Init,

    /// Run one event (JSON file, or - for stdin) through the trigger rules
    Process {
        /// Path to the event JSON
        event: PathBuf,
    },

    /// Request, inspect, and decide approvals
    Approval {
        #[command(subcommand)]
        subcommand: ApprovalSubcommand,
    },

    /// Query the audit log
    Audit {
        #[command(subcommand)]
        subcommand: AuditSubcommand,
    },

    /// Inspect and create content backups
    Backup {
        #[command(subcommand)]
        subcommand: BackupSubcommand,
    },

    /// Restore a page from a backup
    Rollback {
        /// Page id
        page: String,

        /// Restore the backup created at this instant (RFC 3339); default newest
        #[arg(long)]
        at: Option<String>,

        /// Report what would be restored without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Reason recorded in the audit log
        #[arg(long)]
        reason: Option<String>,

        /// Who requested the rollback
        #[arg(long = "by")]
        requested_by: Option<String>,
    },

    /// Apply retention: old audit partitions, old backups, expired approvals
    Cleanup,

    /// Validate the pipeline configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Process { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Process { event } => cmd::process::run(&root, &event, cli.json),
        Commands::Approval { subcommand } => cmd::approval::run(&root, subcommand, cli.json),
        Commands::Audit { subcommand } => cmd::audit::run(&root, subcommand, cli.json),
        Commands::Backup { subcommand } => cmd::backup::run(&root, subcommand, cli.json),
        Commands::Rollback {
            page,
            at,
            dry_run,
            reason,
            requested_by,
        } => cmd::rollback::run(
            &root,
            cmd::rollback::RollbackArgs {
                page,
                at,
                dry_run,
                reason,
                requested_by,
            },
            cli.json,
        ),
        Commands::Cleanup => cmd::cleanup::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
