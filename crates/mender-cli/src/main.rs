mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, dedup::DedupSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mender",
    about = "Plan-first host remediation: detect, propose, approve, execute",
    version,
    propagate_version = true
)]
struct Cli {
    /// Host state root (default: auto-detect from .mender/)
    #[arg(long, global = true, env = "MENDER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Report what would run without executing any plan step
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .mender/ with a default config
    Init,

    /// Run one evidence cycle
    Run,

    /// Run evidence cycles and answer operator commands until stopped
    Daemon {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Approve a pending plan and execute it (newest if no id is given)
    Approve {
        id: Option<String>,
        /// Only mark approved; the next cycle executes it
        #[arg(long)]
        defer: bool,
    },

    /// Reject a pending plan
    Reject {
        id: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Re-check the host and re-plan a pending plan
    Reinvestigate { id: Option<String> },

    /// List plans, newest first
    List {
        /// Only plans in this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one plan
    Show { id: String },

    /// Inspect deduplication state
    Dedup {
        #[command(subcommand)]
        subcommand: DedupSubcommand,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run | Commands::Daemon { .. } => tracing::Level::INFO,
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
    let dry_run = cli.dry_run;

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run => cmd::cycle::run(&root, dry_run, cli.json),
        Commands::Daemon { cycles } => cmd::cycle::daemon(&root, dry_run, cycles),
        Commands::Approve { id, defer } => {
            cmd::plan::approve(&root, id.as_deref(), defer, dry_run, cli.json)
        }
        Commands::Reject { id, reason } => {
            cmd::plan::reject(&root, id.as_deref(), reason.as_deref(), cli.json)
        }
        Commands::Reinvestigate { id } => {
            cmd::plan::reinvestigate(&root, id.as_deref(), cli.json)
        }
        Commands::List { status } => cmd::plan::list(&root, status.as_deref(), cli.json),
        Commands::Show { id } => cmd::plan::show(&root, &id, cli.json),
        Commands::Dedup { subcommand } => cmd::dedup::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
