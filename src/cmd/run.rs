//! `phasegate run`: dry run, rollback, or a full pipeline run.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::super::Cli;

pub struct RunOptions {
    pub dry_run: bool,
    pub rollback: bool,
    pub resume: bool,
    pub yes: bool,
    pub config: Option<PathBuf>,
}

/// Returns `true` when the run ended failed.
pub async fn cmd_run(cli: &Cli, target: &Path, opts: RunOptions) -> Result<bool> {
    use phasegate::config::Config;
    use phasegate::logging;
    use phasegate::orchestrator::PipelineOrchestrator;
    use phasegate::ui::{self, PipelineUi, icons::ROLLBACK};

    if opts.dry_run {
        let config = Config::new(target, opts.config.as_deref(), opts.yes, cli.verbose)?;
        ui::print_plan(&config.target_dir, &config.pipeline);
        return Ok(false);
    }

    if opts.rollback {
        let config = Config::paths_only(target)?;
        let _guard = logging::init(cli.verbose, cli.log_json, Some(&config.log_dir))?;
        let snapshot = PipelineOrchestrator::from_config(config).rollback()?;
        println!(
            "{} Restored snapshot {} ({})",
            ROLLBACK,
            console::style(&snapshot.id).bold(),
            snapshot.label
        );
        return Ok(false);
    }

    let config = Config::new(target, opts.config.as_deref(), opts.yes, cli.verbose)?;
    let _guard = logging::init(cli.verbose, cli.log_json, Some(&config.log_dir))?;
    tracing::info!(target = %config.target_dir.display(), phases = config.pipeline.phases.len(), resume = opts.resume, "starting run");

    let ui = PipelineUi::new(config.pipeline.phases.len() as u64, cli.verbose);
    let mut orchestrator = PipelineOrchestrator::from_config(config).with_ui(ui);
    let report = orchestrator.run(opts.resume).await?;
    ui::print_report(&report);

    Ok(report.is_failed())
}
