use crate::errors::WorkerError;
use crate::gates::{GateValidator, RetryController, RetryOutcome};
use crate::phase::Phase;
use crate::signals::parse_response;
use crate::worker::WorkerRegistry;
use crate::workspace::Workspace;

/// Re-invocations of a loopable phase before it is reported incomplete.
pub const MAX_LOOP_ITERATIONS: u32 = 5;

/// How one phase execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseResult {
    Completed {
        output: String,
        /// Worker invocations across all iterations
        attempts: u32,
        iterations: u32,
    },
    /// The completion gate was never passed within the retry bound.
    GateFailure { last_output: String, attempts: u32 },
    /// A loopable phase still reported remaining work after the loop bound.
    Incomplete {
        remaining: Vec<String>,
        last_output: String,
        attempts: u32,
        iterations: u32,
    },
}

impl PhaseResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. }
            | Self::GateFailure { attempts, .. }
            | Self::Incomplete { attempts, .. } => *attempts,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::GateFailure { .. } => "gate-failed",
            Self::Incomplete { .. } => "incomplete",
        }
    }
}

/// Executes one phase through the retry primitive.
pub struct PhaseRunner {
    registry: WorkerRegistry,
}

impl PhaseRunner {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    /// Run `phase`, holding the workspace write guard for every invocation.
    ///
    /// `notes` are revision notes from an earlier approval decision.
    pub async fn run(
        &self,
        phase: &Phase,
        workspace: &Workspace,
        notes: Option<&str>,
    ) -> Result<PhaseResult, WorkerError> {
        let worker = self.registry.get(&phase.worker)?;
        let retry = RetryController::new(phase.max_retries);
        let markers = phase.accepted_markers();

        let mut task = build_task(phase, notes, &[]);
        let mut attempts = 0;
        let mut iteration = 0;

        loop {
            iteration += 1;
            tracing::info!(phase = %phase.name, iteration, "running phase");

            let outcome = {
                let _write = workspace.write().await;
                retry
                    .invoke(worker.as_ref(), &task, &workspace.scope(), &markers)
                    .await
            };
            attempts += outcome.attempts();

            let output = match outcome {
                RetryOutcome::Passed { output, .. } => output,
                RetryOutcome::Exhausted { last_output, .. } => {
                    tracing::error!(phase = %phase.name, attempts, "completion gate exhausted");
                    return Ok(PhaseResult::GateFailure {
                        last_output,
                        attempts,
                    });
                }
            };

            if !phase.is_loopable() || !GateValidator::check(&output, &phase.more_work_marker) {
                return Ok(PhaseResult::Completed {
                    output,
                    attempts,
                    iterations: iteration,
                });
            }

            let remaining = parse_response(&output).remaining;
            if iteration >= MAX_LOOP_ITERATIONS {
                tracing::warn!(phase = %phase.name, remaining = remaining.len(), "work remains after loop bound");
                return Ok(PhaseResult::Incomplete {
                    remaining,
                    last_output: output,
                    attempts,
                    iterations: iteration,
                });
            }

            tracing::info!(phase = %phase.name, remaining = remaining.len(), "partial completion, continuing");
            task = build_task(phase, notes, &remaining);
        }
    }
}

fn build_task(phase: &Phase, notes: Option<&str>, remaining: &[String]) -> String {
    let mut task = if phase.task.trim().is_empty() {
        format!("Complete the '{}' phase.", phase.name)
    } else {
        phase.task.trim_end().to_string()
    };

    if let Some(notes) = notes {
        task.push_str(&format!("\n\n## REVISION NOTES\n{}", notes.trim()));
    }

    if !remaining.is_empty() {
        task.push_str("\n\n## REMAINING WORK\nEarlier passes completed part of this phase. Work only on:\n");
        for item in remaining {
            task.push_str(&format!("- {}\n", item));
        }
    }

    task.push_str(&format!(
        "\n\n## COMPLETION\nWhen the phase is fully complete, output:\n{}\n",
        phase.marker
    ));
    if phase.is_loopable() {
        task.push_str(&format!(
            "If work remains when you stop, output instead:\n{}\nand list each remaining item as:\nREMAINING: <description>\n",
            phase.more_work_marker
        ));
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseKind;
    use crate::worker::testing::ScriptedWorker;
    use std::sync::Arc;

    fn runner(worker: &Arc<ScriptedWorker>) -> PhaseRunner {
        PhaseRunner::new(WorkerRegistry::new().with("builder", worker.clone()))
    }

    #[tokio::test]
    async fn test_normal_phase_completes() {
        let worker = Arc::new(ScriptedWorker::new("builder", vec!["done\nPLAN COMPLETE"]));
        let phase = Phase::new("plan", "builder", "Write the plan", "PLAN COMPLETE");
        let result = runner(&worker)
            .run(&phase, &Workspace::new("/tmp"), None)
            .await
            .unwrap();
        assert!(result.is_completed());
        assert_eq!(result.attempts(), 1);
        assert!(worker.tasks()[0].starts_with("Write the plan"));
        assert!(!worker.calls.lock().unwrap()[0].scope.read_only);
    }

    #[tokio::test]
    async fn test_max_retries_three_yields_four_invocations_and_last_output() {
        let worker = Arc::new(ScriptedWorker::new(
            "builder",
            vec!["try 1", "try 2", "try 3", "try 4"],
        ));
        let phase = Phase::new("build", "builder", "Build it", "BUILD COMPLETE").with_max_retries(3);
        let result = runner(&worker)
            .run(&phase, &Workspace::new("/tmp"), None)
            .await
            .unwrap();
        assert_eq!(worker.call_count(), 4);
        assert_eq!(
            result,
            PhaseResult::GateFailure {
                last_output: "try 4".into(),
                attempts: 4
            }
        );
    }

    #[tokio::test]
    async fn test_loopable_phase_targets_remaining_work() {
        let worker = Arc::new(ScriptedWorker::new(
            "builder",
            vec![
                "REMAINING: wire the CLI\nREMAINING: write tests\nMORE WORK REMAINS",
                "IMPLEMENT COMPLETE",
            ],
        ));
        let phase = Phase::new("implement", "builder", "Implement", "IMPLEMENT COMPLETE")
            .with_kind(PhaseKind::Loopable);
        let result = runner(&worker)
            .run(&phase, &Workspace::new("/tmp"), None)
            .await
            .unwrap();

        match result {
            PhaseResult::Completed { iterations, .. } => assert_eq!(iterations, 2),
            other => panic!("Expected Completed, got {other:?}"),
        }
        let tasks = worker.tasks();
        assert!(!tasks[0].contains("## REMAINING WORK"));
        assert!(tasks[1].contains("- wire the CLI"));
        assert!(tasks[1].contains("- write tests"));
    }

    #[tokio::test]
    async fn test_loopable_phase_reports_incomplete_after_bound() {
        let worker = Arc::new(ScriptedWorker::new(
            "builder",
            vec!["REMAINING: everything\nMORE WORK REMAINS"],
        ));
        let phase = Phase::new("implement", "builder", "Implement", "IMPLEMENT COMPLETE")
            .with_kind(PhaseKind::Loopable);
        let result = runner(&worker)
            .run(&phase, &Workspace::new("/tmp"), None)
            .await
            .unwrap();

        match result {
            PhaseResult::Incomplete {
                remaining,
                iterations,
                ..
            } => {
                assert_eq!(iterations, MAX_LOOP_ITERATIONS);
                assert_eq!(remaining, vec!["everything".to_string()]);
            }
            other => panic!("Expected Incomplete, got {other:?}"),
        }
        assert_eq!(worker.call_count() as u32, MAX_LOOP_ITERATIONS);
    }

    #[tokio::test]
    async fn test_more_work_marker_wins_over_completion_marker() {
        let worker = Arc::new(ScriptedWorker::new(
            "builder",
            vec!["IMPLEMENT COMPLETE\nMORE WORK REMAINS", "IMPLEMENT COMPLETE"],
        ));
        let phase = Phase::new("implement", "builder", "Implement", "IMPLEMENT COMPLETE")
            .with_kind(PhaseKind::Loopable);
        runner(&worker)
            .run(&phase, &Workspace::new("/tmp"), None)
            .await
            .unwrap();
        assert_eq!(worker.call_count(), 2);
    }

    #[tokio::test]
    async fn test_normal_phase_ignores_more_work_marker() {
        let worker = Arc::new(ScriptedWorker::new("builder", vec!["MORE WORK REMAINS"]));
        let phase = Phase::new("plan", "builder", "Plan", "PLAN COMPLETE").with_max_retries(0);
        let result = runner(&worker)
            .run(&phase, &Workspace::new("/tmp"), None)
            .await
            .unwrap();
        assert_eq!(result.status(), "gate-failed");
    }

    #[tokio::test]
    async fn test_revision_notes_are_appended() {
        let worker = Arc::new(ScriptedWorker::new("builder", vec!["PLAN COMPLETE"]));
        let phase = Phase::new("plan", "builder", "Plan", "PLAN COMPLETE");
        runner(&worker)
            .run(&phase, &Workspace::new("/tmp"), Some("split into two modules"))
            .await
            .unwrap();
        let task = &worker.tasks()[0];
        assert!(task.contains("## REVISION NOTES\nsplit into two modules"));
        assert!(task.trim_end().ends_with("PLAN COMPLETE"));
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let runner = PhaseRunner::new(WorkerRegistry::new());
        let phase = Phase::new("plan", "ghost", "", "DONE");
        let err = runner
            .run(&phase, &Workspace::new("/tmp"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnknownWorker(name) if name == "ghost"));
    }
}
