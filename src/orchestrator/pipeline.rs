//! End-to-end driver for one pipeline run.
//!
//! A run moves through four stages, each optional after the first:
//!
//! 1. declared phases, in order, each behind its completion gate and
//!    optionally the quality gate and an approval decision
//! 2. review: concurrent scan, merge, one fix invocation
//! 3. convergence: fix and rescore until clean, stagnant or capped
//! 4. lessons: distil the review into deduplicated lesson entries
//!
//! The workspace snapshot is captured before anything can mutate it, and the
//! run record is persisted after every transition so an `awaiting-approval`
//! run can be resumed.

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use super::phase_runner::{PhaseResult, PhaseRunner};
use super::state::{HaltReason, PipelineRun, RunStatus, StateManager};
use crate::config::{Config, LessonsConfig};
use crate::convergence::{ConvergenceExit, ConvergenceLoop, ConvergenceReport};
use crate::errors::{PipelineError, SnapshotError};
use crate::gates::{ApprovalContext, ApprovalGate, Decision, QualityGate, QualityOutcome, RetryController};
use crate::lessons::LessonStore;
use crate::review::{Finding, ReviewOutcome, ReviewStage, issue_lines};
use crate::signals::parse_response;
use crate::tracker::{GitSnapshotStore, Snapshot, SnapshotStore, snapshot_label};
use crate::ui::PipelineUi;
use crate::worker::{RecordingWorker, WorkerClient, WorkerRegistry};
use crate::workspace::Workspace;

/// Summary handed back to the caller when a run stops.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub cursor: usize,
    pub total_phases: usize,
    pub completed_phases: Vec<String>,
    pub snapshot_id: Option<String>,
    pub halt: Option<HaltReason>,
    pub review: Option<ReviewOutcome>,
    pub convergence: Option<ConvergenceReport>,
    pub lessons_recorded: usize,
}

impl RunReport {
    fn new(
        run: &PipelineRun,
        review: Option<ReviewOutcome>,
        convergence: Option<ConvergenceReport>,
        lessons_recorded: usize,
    ) -> Self {
        Self {
            run_id: run.id.clone(),
            status: run.status,
            cursor: run.cursor,
            total_phases: run.phases.len(),
            completed_phases: run.phases[..run.cursor]
                .iter()
                .map(|p| p.name.clone())
                .collect(),
            snapshot_id: run.snapshot_id.clone(),
            halt: run.halt.clone(),
            review,
            convergence,
            lessons_recorded,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

pub struct PipelineOrchestrator {
    config: Config,
    registry: WorkerRegistry,
    snapshots: Arc<dyn SnapshotStore>,
    approval: ApprovalGate,
    lessons: LessonStore,
    state: StateManager,
    ui: Option<PipelineUi>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Config,
        registry: WorkerRegistry,
        snapshots: Arc<dyn SnapshotStore>,
        approval: ApprovalGate,
    ) -> Self {
        let lessons = LessonStore::from_config(&config);
        let state = StateManager::new(config.state_file.clone());
        Self {
            config,
            registry,
            snapshots,
            approval,
            lessons,
            state,
            ui: None,
        }
    }

    /// Command workers from `[workers]`, git snapshots, and the terminal
    /// prompt (or auto-approval with `--yes`).
    pub fn from_config(config: Config) -> Self {
        let registry = WorkerRegistry::from_config(&config.pipeline);
        let snapshots = Arc::new(GitSnapshotStore::new(&config.target_dir));
        let approval = ApprovalGate::auto(config.auto_approve);
        Self::new(config, registry, snapshots, approval)
    }

    pub fn with_ui(mut self, ui: PipelineUi) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drive the run to completion or to its first halt.
    ///
    /// Bounded failures, rejection and revision come back as a report with a
    /// [`HaltReason`]; `Err` means the infrastructure itself failed.
    pub async fn run(&mut self, resume: bool) -> Result<RunReport> {
        self.config.ensure_directories()?;

        let mut run = if resume {
            self.resume_run()?
        } else {
            self.start_run()?
        };
        run.save(&self.config.run_file)?;

        let registry = self.recording_registry(&run.id);
        let workspace = Workspace::new(&self.config.target_dir);

        if let Some((status, reason)) = self.run_phases(&mut run, &registry, &workspace).await? {
            self.halt(&mut run, status, reason)?;
            return Ok(self.finish(&run, None, None, 0));
        }

        let review = match self.config.pipeline.review.clone() {
            Some(review_config) => {
                self.step("reviewing workspace");
                let outcome = ReviewStage::from_config(&review_config, &registry)?
                    .run(&workspace)
                    .await;
                self.step_done(&format!(
                    "review: {} finding(s) merged into {}, {} scanner(s) unavailable",
                    outcome.scan.total_findings(),
                    outcome.canonical.len(),
                    outcome.scan.unavailable.len()
                ));
                if outcome.fix_failed() {
                    let last_output = outcome
                        .fix
                        .as_ref()
                        .map(|fix| fix.output().to_string())
                        .unwrap_or_default();
                    self.halt(&mut run, RunStatus::Failed, HaltReason::ReviewFixFailed { last_output })?;
                    return Ok(self.finish(&run, Some(outcome), None, 0));
                }
                Some(outcome)
            }
            None => None,
        };

        let convergence = match self.config.pipeline.convergence.clone() {
            Some(convergence_config) => {
                self.step("scoring workspace");
                let converge = ConvergenceLoop::from_config(&convergence_config, &registry)?;
                let report = match converge.assess(&workspace).await {
                    Ok(initial) => converge.run(&workspace, initial).await,
                    Err(outcome) => ConvergenceReport {
                        records: Vec::new(),
                        exit: ConvergenceExit::Halted {
                            step: "initial score".to_string(),
                            last_output: outcome.output().to_string(),
                        },
                    },
                };
                self.step_done(&format!(
                    "convergence {} after {} iteration(s), score {}",
                    report.exit,
                    report.iterations(),
                    report
                        .final_score()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string())
                ));
                if let ConvergenceExit::Halted { step, last_output } = &report.exit {
                    let reason = HaltReason::ConvergenceHalted {
                        step: step.clone(),
                        last_output: last_output.clone(),
                    };
                    self.halt(&mut run, RunStatus::Failed, reason)?;
                    return Ok(self.finish(&run, review, Some(report), 0));
                }
                Some(report)
            }
            None => None,
        };

        let lessons_recorded = match self.config.pipeline.lessons.clone() {
            Some(lessons_config) => {
                self.extract_lessons(
                    &lessons_config,
                    &registry,
                    &workspace,
                    review.as_ref(),
                    convergence.as_ref(),
                )
                .await
            }
            None => 0,
        };

        run.status = RunStatus::Completed;
        run.halt = None;
        run.save(&self.config.run_file)?;
        tracing::info!(run = %run.id, "run completed");

        Ok(self.finish(&run, review, convergence, lessons_recorded))
    }

    /// Restore the most recent snapshot of the target.
    ///
    /// An unfinished run is marked failed so it can no longer be resumed.
    pub fn rollback(&self) -> Result<Snapshot> {
        let snapshot = self
            .snapshots
            .latest()?
            .ok_or_else(|| SnapshotError::NoSnapshot(self.config.target_dir.clone()))?;
        self.snapshots
            .restore(&snapshot.id)
            .map_err(|source| PipelineError::RestoreFailed {
                snapshot: snapshot.id.clone(),
                source,
            })?;
        tracing::info!(snapshot = %snapshot.id, "workspace restored");

        if let Some(mut run) = PipelineRun::load(&self.config.run_file)?
            && matches!(run.status, RunStatus::Running | RunStatus::AwaitingApproval)
        {
            let phase = run
                .current_phase()
                .map(|p| p.name.clone())
                .unwrap_or_default();
            run.status = RunStatus::Failed;
            run.halt = Some(HaltReason::Rejected {
                phase,
                snapshot_id: snapshot.id.clone(),
            });
            run.save(&self.config.run_file)?;
        }

        Ok(snapshot)
    }

    fn start_run(&self) -> Result<PipelineRun> {
        let target = &self.config.target_dir;
        let mut run = PipelineRun::new(target, self.config.pipeline.phases.clone());

        let snapshot = self
            .snapshots
            .capture(&snapshot_label(target, Utc::now()))
            .map_err(PipelineError::SnapshotCapture)?;
        tracing::info!(run = %run.id, snapshot = %snapshot.id, "snapshot captured");

        run.snapshot_id = Some(snapshot.id);
        run.status = RunStatus::Running;
        Ok(run)
    }

    fn resume_run(&self) -> Result<PipelineRun> {
        let mut run = PipelineRun::load(&self.config.run_file)?.ok_or_else(|| {
            PipelineError::NotResumable(format!(
                "no run recorded for {}",
                self.config.target_dir.display()
            ))
        })?;
        if !run.is_resumable() {
            return Err(PipelineError::NotResumable(format!(
                "run {} is {}, only awaiting-approval runs can resume",
                run.id, run.status
            ))
            .into());
        }
        if run.phases != self.config.pipeline.phases {
            return Err(PipelineError::NotResumable(format!(
                "pipeline definition changed since run {} started",
                run.id
            ))
            .into());
        }

        tracing::info!(run = %run.id, cursor = run.cursor, "resuming run");
        run.status = RunStatus::Running;
        run.halt = None;
        Ok(run)
    }

    /// Every worker wrapped so its tasks and outputs land in `logs/<run-id>/`.
    fn recording_registry(&self, run_id: &str) -> WorkerRegistry {
        let log_dir = self.config.log_dir.join(run_id);
        let counter = Arc::new(AtomicU32::new(recorded_invocations(&log_dir)));
        self.registry.clone().map(|worker| {
            Arc::new(RecordingWorker::new(worker, log_dir.clone(), counter.clone()))
                as Arc<dyn WorkerClient>
        })
    }

    /// Run phases from the cursor; `Some` is the halt that stopped them.
    async fn run_phases(
        &mut self,
        run: &mut PipelineRun,
        registry: &WorkerRegistry,
        workspace: &Workspace,
    ) -> Result<Option<(RunStatus, HaltReason)>> {
        let runner = PhaseRunner::new(registry.clone());
        let quality = match &self.config.pipeline.quality {
            Some(q) => Some(QualityGate::from_specs(
                &q.checks,
                registry.get(&q.worker)?,
                &q.marker,
                q.max_retries,
                q.max_corrections,
            )),
            None => None,
        };

        while let Some(phase) = run.current_phase().cloned() {
            if let Some(ui) = &self.ui {
                ui.start_phase(run.cursor, &phase);
            }

            let notes = run.revision_notes.take();
            let result = runner.run(&phase, workspace, notes.as_deref()).await?;
            self.state
                .save(&phase.name, result.attempts(), result.status())?;

            let output = match result {
                PhaseResult::Completed { output, .. } => output,
                PhaseResult::GateFailure {
                    last_output,
                    attempts,
                } => {
                    return Ok(Some((
                        RunStatus::Failed,
                        HaltReason::GateFailure {
                            phase: phase.name,
                            attempts,
                            last_output,
                        },
                    )));
                }
                PhaseResult::Incomplete {
                    remaining,
                    last_output,
                    ..
                } => {
                    return Ok(Some((
                        RunStatus::Failed,
                        HaltReason::Incomplete {
                            phase: phase.name,
                            remaining,
                            last_output,
                        },
                    )));
                }
            };

            if phase.quality_gate
                && let Some(gate) = &quality
                && let QualityOutcome::Failed {
                    violations,
                    corrections,
                    last_output,
                } = gate.enforce(workspace, &phase.name).await
            {
                self.state.save(&phase.name, corrections, "quality-failed")?;
                return Ok(Some((
                    RunStatus::Failed,
                    HaltReason::QualityViolations {
                        phase: phase.name,
                        violations,
                        last_output,
                    },
                )));
            }

            if phase.is_approval_gated() {
                if let Some(ui) = &self.ui {
                    ui.awaiting_decision(&phase.name);
                }
                let context = ApprovalContext {
                    phase: phase.name.clone(),
                    output,
                    snapshot_id: run.snapshot_id.clone(),
                };
                let decision = self.approval.await_decision(&context)?;
                run.decisions
                    .extend(self.approval.records().last().cloned());

                match decision {
                    Decision::Approve => {}
                    Decision::Reject => {
                        let snapshot_id = self.restore_run_snapshot(run)?;
                        return Ok(Some((
                            RunStatus::Failed,
                            HaltReason::Rejected {
                                phase: phase.name,
                                snapshot_id,
                            },
                        )));
                    }
                    Decision::Revise { notes } => {
                        run.revision_notes = Some(notes.clone());
                        return Ok(Some((
                            RunStatus::AwaitingApproval,
                            HaltReason::RevisionRequested {
                                phase: phase.name,
                                notes,
                            },
                        )));
                    }
                }
            }

            run.advance();
            run.save(&self.config.run_file)?;
            if let Some(ui) = &self.ui {
                ui.phase_complete(&phase.name);
            }
        }

        Ok(None)
    }

    fn restore_run_snapshot(&self, run: &PipelineRun) -> Result<String> {
        let snapshot_id = run
            .snapshot_id
            .clone()
            .ok_or_else(|| anyhow!("run {} has no snapshot to restore", run.id))?;
        self.snapshots
            .restore(&snapshot_id)
            .map_err(|source| PipelineError::RestoreFailed {
                snapshot: snapshot_id.clone(),
                source,
            })?;
        tracing::info!(run = %run.id, snapshot = %snapshot_id, "workspace restored after rejection");
        Ok(snapshot_id)
    }

    /// Ask the lessons worker to distil the review and record what it finds.
    ///
    /// Lessons are advisory: a worker that never passes its gate, or a log
    /// that cannot be written, is logged and skipped.
    async fn extract_lessons(
        &self,
        config: &LessonsConfig,
        registry: &WorkerRegistry,
        workspace: &Workspace,
        review: Option<&ReviewOutcome>,
        convergence: Option<&ConvergenceReport>,
    ) -> usize {
        let findings: Vec<Finding> = review
            .map(|r| r.canonical.iter().map(|c| c.to_finding()).collect())
            .unwrap_or_default();
        let residual = convergence.map(|c| c.residual_issues()).unwrap_or_default();
        let mut fixes: Vec<String> = review
            .map(|r| r.applied_fixes.iter().map(|f| f.to_string()).collect())
            .unwrap_or_default();
        fixes.extend(convergence.map(|c| c.applied_fixes()).unwrap_or_default());

        if findings.is_empty() && residual.is_empty() && fixes.is_empty() {
            tracing::debug!("nothing reviewed, skipping lesson extraction");
            return 0;
        }

        let worker = match registry.get(&config.worker) {
            Ok(worker) => worker,
            Err(e) => {
                tracing::warn!(error = %e, "lessons worker unavailable");
                return 0;
            }
        };

        self.step("extracting lessons");
        let task = lessons_task(&config.task, &findings, &fixes, residual, &config.marker);
        let outcome = {
            let _read = workspace.read().await;
            RetryController::new(crate::phase::DEFAULT_MAX_RETRIES)
                .invoke(
                    worker.as_ref(),
                    &task,
                    &workspace.read_only_scope(),
                    &[&config.marker],
                )
                .await
        };
        if !outcome.is_passed() {
            tracing::warn!(attempts = outcome.attempts(), "lessons worker never completed, no lessons recorded");
            self.step_done("lessons: worker did not complete");
            return 0;
        }

        let mut recorded = 0;
        for signal in parse_response(outcome.output()).lessons {
            match self.lessons.record_signal(&signal) {
                Ok(results) => recorded += results.iter().filter(|(_, added)| *added).count(),
                Err(e) => tracing::warn!(error = %e, category = %signal.category, "failed to record lesson"),
            }
        }
        self.step_done(&format!("lessons: {} recorded", recorded));
        recorded
    }

    fn halt(
        &self,
        run: &mut PipelineRun,
        status: RunStatus,
        reason: HaltReason,
    ) -> Result<(), PipelineError> {
        tracing::warn!(run = %run.id, %status, halt = %reason, "run halted");
        if let Some(ui) = &self.ui {
            ui.halted(&reason);
        }
        run.status = status;
        run.halt = Some(reason);
        run.save(&self.config.run_file)
    }

    fn finish(
        &self,
        run: &PipelineRun,
        review: Option<ReviewOutcome>,
        convergence: Option<ConvergenceReport>,
        lessons_recorded: usize,
    ) -> RunReport {
        if let Some(ui) = &self.ui {
            ui.finish();
        }
        RunReport::new(run, review, convergence, lessons_recorded)
    }

    fn step(&self, label: &str) {
        if let Some(ui) = &self.ui {
            ui.start_step(label);
        }
    }

    fn step_done(&self, summary: &str) {
        if let Some(ui) = &self.ui {
            ui.finish_step(summary);
        }
    }
}

/// Invocations already recorded under `log_dir`, so a resumed run keeps numbering.
fn recorded_invocations(log_dir: &Path) -> u32 {
    fs::read_dir(log_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".task.md"))
                .count() as u32
        })
        .unwrap_or(0)
}

fn lessons_task(
    task: &str,
    findings: &[Finding],
    fixes: &[String],
    residual: &[Finding],
    marker: &str,
) -> String {
    let mut out = if task.trim().is_empty() {
        String::from(
            "Distil reusable lessons from this review. Prefer general patterns over one-off details.",
        )
    } else {
        task.trim_end().to_string()
    };

    if !findings.is_empty() {
        out.push_str("\n\n## FINDINGS\n");
        out.push_str(&issue_lines(findings));
    }
    if !fixes.is_empty() {
        out.push_str("\n\n## APPLIED FIXES\n");
        for fix in fixes {
            out.push_str(&format!("FIX_APPLIED: {}\n", fix));
        }
    }
    if !residual.is_empty() {
        out.push_str("\n\n## RESIDUAL ISSUES\n");
        out.push_str(&issue_lines(residual));
    }

    out.push_str(&format!(
        "\n\nDo not modify any file.\n\
         Output each lesson as:\nLESSON: <project|global|both>/<category> — <text>\n\n\
         When done, output:\n{}\n",
        marker
    ));
    out
}
