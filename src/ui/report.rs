//! Plain console output for plans, final reports, run status and lessons.

use console::style;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::convergence::ConvergenceReport;
use crate::lessons::{LessonEntry, LessonScope};
use crate::orchestrator::{PipelineRun, RunReport, RunStatus, StateEntry};
use crate::review::ReviewOutcome;
use crate::ui::icons::{CHECK, CROSS, LESSON, PAUSE, PROGRESS, REVIEW};

fn status_label(status: RunStatus) -> String {
    let text = status.to_string();
    match status {
        RunStatus::Completed => style(text).green().bold().to_string(),
        RunStatus::Failed => style(text).red().bold().to_string(),
        RunStatus::AwaitingApproval => style(text).yellow().bold().to_string(),
        RunStatus::Pending | RunStatus::Running => style(text).cyan().to_string(),
    }
}

/// `--dry-run`: the phase sequence and the stages that would follow it.
pub fn print_plan(target: &Path, pipeline: &PipelineConfig) {
    println!();
    println!(
        "{} {}",
        style("Pipeline for").bold(),
        style(target.display()).cyan()
    );
    println!();
    println!(
        "{:<4} {:<20} {:<16} {:<14} {:<8} Marker",
        "#", "Phase", "Kind", "Worker", "Retries"
    );
    println!(
        "{:<4} {:<20} {:<16} {:<14} {:<8} ------",
        "--", "-----", "----", "------", "-------"
    );
    for (i, phase) in pipeline.phases.iter().enumerate() {
        let quality = if phase.quality_gate { " +quality" } else { "" };
        println!(
            "{:<4} {:<20} {:<16} {:<14} {:<8} {}{}",
            i + 1,
            phase.name,
            phase.kind.to_string(),
            phase.worker,
            phase.max_retries,
            phase.marker,
            style(quality).dim()
        );
    }
    println!();

    if let Some(review) = &pipeline.review {
        let names: Vec<&str> = review.scanners.iter().map(|s| s.name.as_str()).collect();
        println!(
            "{} review: {} scanner(s) [{}], fixes by {}",
            REVIEW,
            names.len(),
            names.join(", "),
            review.fix_worker
        );
    }
    if let Some(convergence) = &pipeline.convergence {
        println!(
            "{} convergence: scored by {}, fixed by {}, at most {} iteration(s)",
            PROGRESS, convergence.scorer, convergence.fixer, convergence.max_iterations
        );
    }
    if let Some(lessons) = &pipeline.lessons {
        println!("{} lessons: distilled by {}", LESSON, lessons.worker);
    }
    println!();
    println!("{}", style("Dry run: no worker was invoked.").dim());
}

/// Lines summarising the review stage.
pub fn review_lines(review: &ReviewOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} finding(s) from {} scanner(s) merged into {}",
        REVIEW,
        review.scan.total_findings(),
        review.scan.results.len(),
        review.canonical.len()
    )];
    for unavailable in &review.scan.unavailable {
        lines.push(format!(
            "    scanner {} unavailable: {}",
            unavailable.scanner, unavailable.reason
        ));
    }
    for finding in &review.canonical {
        lines.push(format!("    {}", finding));
    }
    if !review.applied_fixes.is_empty() {
        lines.push(format!("    {} fix(es) applied", review.applied_fixes.len()));
    }
    lines
}

/// Lines summarising the convergence stage.
pub fn convergence_lines(report: &ConvergenceReport) -> Vec<String> {
    let scores: Vec<String> = report.records.iter().map(|r| r.score.to_string()).collect();
    let mut lines = vec![format!(
        "{} convergence {} after {} iteration(s), scores {}",
        PROGRESS,
        report.exit,
        report.iterations(),
        if scores.is_empty() {
            "-".to_string()
        } else {
            scores.join(" → ")
        }
    )];
    for issue in report.residual_issues() {
        lines.push(format!("    residual: {}", issue));
    }
    lines
}

pub fn print_report(report: &RunReport) {
    println!();
    println!(
        "Run {}: {} ({}/{} phases)",
        style(&report.run_id).bold(),
        status_label(report.status),
        report.cursor,
        report.total_phases
    );
    if let Some(snapshot) = &report.snapshot_id {
        println!("  {} {}", style("Snapshot:").dim(), snapshot);
    }
    if let Some(review) = &report.review {
        review_lines(review).iter().for_each(|l| println!("  {}", l));
    }
    if let Some(convergence) = &report.convergence {
        convergence_lines(convergence)
            .iter()
            .for_each(|l| println!("  {}", l));
    }
    if report.lessons_recorded > 0 {
        println!("  {} {} lesson(s) recorded", LESSON, report.lessons_recorded);
    }
    if let Some(halt) = &report.halt {
        let icon = if report.status == RunStatus::AwaitingApproval {
            PAUSE
        } else {
            CROSS
        };
        println!("  {} {}", icon, halt);
    } else if report.status == RunStatus::Completed {
        println!("  {} All phases passed their gates", CHECK);
    }
    println!();
}

pub fn print_status(run: &PipelineRun, entries: &[StateEntry]) {
    println!();
    println!(
        "Run {} for {}",
        style(&run.id).bold(),
        style(run.target.display()).cyan()
    );
    println!("  {:<10} {}", "Status:", status_label(run.status));
    println!("  {:<10} {}/{}", "Cursor:", run.cursor, run.phases.len());
    println!(
        "  {:<10} {}",
        "Started:",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(snapshot) = &run.snapshot_id {
        println!("  {:<10} {}", "Snapshot:", snapshot);
    }
    if let Some(halt) = &run.halt {
        println!("  {:<10} {}", "Halted:", halt);
    }
    if let Some(notes) = &run.revision_notes {
        println!("  {:<10} {}", "Notes:", notes);
    }
    println!();

    for (i, phase) in run.phases.iter().enumerate() {
        let marker = if i < run.cursor {
            style("✓").green()
        } else if i == run.cursor && run.status != RunStatus::Completed {
            style("▶").yellow()
        } else {
            style("·").dim()
        };
        println!("  {} {}", marker, phase.name);
    }

    if !run.decisions.is_empty() {
        println!();
        println!("{}", style("Decisions:").underlined());
        for record in &run.decisions {
            println!(
                "  {} {} {}",
                style(record.decided_at.format("%Y-%m-%d %H:%M:%S")).dim(),
                record.phase,
                record.decision
            );
        }
    }

    if !entries.is_empty() {
        println!();
        println!("{}", style("History:").underlined());
        for entry in entries {
            println!(
                "  {} {:<20} {:<14} {} attempt(s)",
                style(entry.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
                entry.phase,
                entry.status,
                entry.attempts
            );
        }
    }
    println!();
}

pub fn print_lessons(scope: LessonScope, path: &Path, entries: &[LessonEntry]) {
    println!();
    if entries.is_empty() {
        println!("No {} lessons recorded at {}", scope, path.display());
        println!();
        return;
    }
    println!(
        "{} {} {} lesson(s) from {}",
        LESSON,
        entries.len(),
        scope,
        style(path.display()).dim()
    );
    println!();
    for entry in entries {
        println!(
            "  {} {} {}",
            style(entry.recorded_at.format("%Y-%m-%d")).dim(),
            style(format!("[{}]", entry.category)).cyan(),
            entry.text
        );
    }
    println!();
}
