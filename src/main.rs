use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(version, about = "Phase-gated pipeline orchestrator for delegated work")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit stderr logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline declared for a target directory
    Run {
        /// Target workspace (must be a git repository)
        target: PathBuf,

        /// Print the phase sequence and exit without invoking any worker
        #[arg(long, conflicts_with_all = ["rollback", "resume"])]
        dry_run: bool,

        /// Restore the most recent snapshot of the target and exit
        #[arg(long, conflicts_with = "resume")]
        rollback: bool,

        /// Continue a run halted for revision
        #[arg(long)]
        resume: bool,

        /// Approve every approval gate without prompting
        #[arg(short, long)]
        yes: bool,

        /// Pipeline file (defaults to <target>/.phasegate/pipeline.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the persisted run for a target
    Status { target: PathBuf },
    /// List recorded lessons
    Lessons {
        target: PathBuf,

        /// Show the global log instead of the project one
        #[arg(long)]
        global: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            target,
            dry_run,
            rollback,
            resume,
            yes,
            config,
        } => {
            let opts = cmd::RunOptions {
                dry_run: *dry_run,
                rollback: *rollback,
                resume: *resume,
                yes: *yes,
                config: config.clone(),
            };
            let failed = cmd::cmd_run(&cli, target, opts).await?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Status { target } => cmd::cmd_status(target)?,
        Commands::Lessons { target, global } => cmd::cmd_lessons(target, *global)?,
    }

    Ok(())
}
