//! Deterministic post-implementation checks with bounded correction.
//!
//! The gate itself never edits the workspace. It evaluates checks, hands any
//! violations to a correction worker, and re-evaluates, up to
//! `max_corrections` rounds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::RetryController;
use crate::config::CheckSpec;
use crate::workspace::Workspace;
use crate::worker::WorkerClient;

/// Lines of check output kept on a violation.
const VIOLATION_TAIL_LINES: usize = 40;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub check: String,
    pub detail: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.check, self.detail)
    }
}

/// A repeatable check against the workspace.
#[async_trait]
pub trait QualityCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the check passes.
    async fn run(&self, workspace: &Path) -> Option<Violation>;
}

/// Runs a command; a non-zero exit or running past `timeout_secs` is a violation.
pub struct CommandCheck {
    spec: CheckSpec,
}

impl CommandCheck {
    pub fn new(spec: CheckSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl QualityCheck for CommandCheck {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn run(&self, workspace: &Path) -> Option<Violation> {
        let timeout = Duration::from_secs(self.spec.timeout_secs);
        let output = Command::new(&self.spec.command)
            .args(&self.spec.args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, output).await {
            Err(_) => {
                tracing::warn!(check = %self.spec.name, secs = self.spec.timeout_secs, "quality check timed out");
                Some(Violation {
                    check: self.spec.name.clone(),
                    detail: format!("timed out after {}s", self.spec.timeout_secs),
                })
            }
            Ok(Ok(output)) if output.status.success() => None,
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                Some(Violation {
                    check: self.spec.name.clone(),
                    detail: format!(
                        "exit {}: {}",
                        output.status.code().unwrap_or(-1),
                        tail(&combined, VIOLATION_TAIL_LINES)
                    ),
                })
            }
            Ok(Err(e)) => Some(Violation {
                check: self.spec.name.clone(),
                detail: format!("failed to run `{}`: {}", self.spec.command, e),
            }),
        }
    }
}

fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// How a quality gate run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityOutcome {
    Clean { corrections: u32 },
    Failed {
        violations: Vec<Violation>,
        corrections: u32,
        /// Raw output of a correction call that never passed its gate
        last_output: Option<String>,
    },
}

pub struct QualityGate {
    checks: Vec<Box<dyn QualityCheck>>,
    worker: Arc<dyn WorkerClient>,
    marker: String,
    retry: RetryController,
    max_corrections: u32,
}

impl QualityGate {
    pub fn new(
        checks: Vec<Box<dyn QualityCheck>>,
        worker: Arc<dyn WorkerClient>,
        marker: &str,
        max_retries: u32,
        max_corrections: u32,
    ) -> Self {
        Self {
            checks,
            worker,
            marker: marker.to_string(),
            retry: RetryController::new(max_retries),
            max_corrections,
        }
    }

    pub fn from_specs(
        specs: &[CheckSpec],
        worker: Arc<dyn WorkerClient>,
        marker: &str,
        max_retries: u32,
        max_corrections: u32,
    ) -> Self {
        let checks = specs
            .iter()
            .cloned()
            .map(|spec| Box::new(CommandCheck::new(spec)) as Box<dyn QualityCheck>)
            .collect();
        Self::new(checks, worker, marker, max_retries, max_corrections)
    }

    /// Run every check in declared order.
    pub async fn evaluate(&self, workspace: &Path) -> Vec<Violation> {
        let mut violations = Vec::new();
        for check in &self.checks {
            if let Some(v) = check.run(workspace).await {
                tracing::warn!(check = %check.name(), "quality check failed");
                violations.push(v);
            }
        }
        violations
    }

    /// Evaluate, correct, re-evaluate until clean or out of rounds.
    pub async fn enforce(&self, workspace: &Workspace, phase: &str) -> QualityOutcome {
        let mut violations = {
            let _read = workspace.read().await;
            self.evaluate(workspace.root()).await
        };
        let mut corrections = 0;

        while !violations.is_empty() {
            if corrections >= self.max_corrections {
                tracing::error!(phase, corrections, "quality violations persist after correction bound");
                return QualityOutcome::Failed {
                    violations,
                    corrections,
                    last_output: None,
                };
            }
            corrections += 1;
            tracing::info!(phase, round = corrections, count = violations.len(), "requesting correction");

            let task = correction_task(phase, &violations, &self.marker);
            let outcome = {
                let _write = workspace.write().await;
                self.retry
                    .invoke(self.worker.as_ref(), &task, &workspace.scope(), &[&self.marker])
                    .await
            };
            if !outcome.is_passed() {
                return QualityOutcome::Failed {
                    violations,
                    corrections,
                    last_output: Some(outcome.output().to_string()),
                };
            }

            violations = {
                let _read = workspace.read().await;
                self.evaluate(workspace.root()).await
            };
        }

        QualityOutcome::Clean { corrections }
    }
}

fn correction_task(phase: &str, violations: &[Violation], marker: &str) -> String {
    let mut task = format!(
        "Automated checks failed after phase '{phase}'. Fix the workspace so every check passes.\n\n## VIOLATIONS\n"
    );
    for v in violations {
        task.push_str(&format!("- {v}\n"));
    }
    task.push_str(&format!("\nWhen every violation is fixed, output:\n{marker}\n"));
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::ScriptedWorker;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails its first `failures` runs, then passes.
    struct FlakyCheck {
        failures: u32,
        runs: AtomicU32,
    }

    #[async_trait]
    impl QualityCheck for FlakyCheck {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self, _workspace: &Path) -> Option<Violation> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            (run < self.failures).then(|| Violation {
                check: "flaky".into(),
                detail: format!("run {run} failed"),
            })
        }
    }

    fn gate(failures: u32, worker: Arc<ScriptedWorker>) -> QualityGate {
        QualityGate::new(
            vec![Box::new(FlakyCheck {
                failures,
                runs: AtomicU32::new(0),
            })],
            worker,
            "CORRECTION COMPLETE",
            2,
            2,
        )
    }

    #[tokio::test]
    async fn test_clean_workspace_needs_no_worker() {
        let worker = Arc::new(ScriptedWorker::new("fixer", vec![]));
        let outcome = gate(0, worker.clone())
            .enforce(&Workspace::new("/tmp"), "implement")
            .await;
        assert_eq!(outcome, QualityOutcome::Clean { corrections: 0 });
        assert_eq!(worker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_one_correction_round_clears_violation() {
        let worker = Arc::new(ScriptedWorker::new("fixer", vec!["CORRECTION COMPLETE"]));
        let outcome = gate(1, worker.clone())
            .enforce(&Workspace::new("/tmp"), "implement")
            .await;
        assert_eq!(outcome, QualityOutcome::Clean { corrections: 1 });
        assert_eq!(worker.call_count(), 1);
        assert!(worker.tasks()[0].contains("[flaky] run 0 failed"));
    }

    #[tokio::test]
    async fn test_persistent_violations_halt_with_list() {
        let worker = Arc::new(ScriptedWorker::new("fixer", vec!["CORRECTION COMPLETE"]));
        let outcome = gate(u32::MAX, worker.clone())
            .enforce(&Workspace::new("/tmp"), "implement")
            .await;
        match outcome {
            QualityOutcome::Failed {
                violations,
                corrections,
                last_output,
            } => {
                assert_eq!(corrections, 2);
                assert_eq!(violations.len(), 1);
                assert!(last_output.is_none());
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert_eq!(worker.call_count(), 2);
    }

    #[tokio::test]
    async fn test_correction_gate_exhaustion_halts() {
        let worker = Arc::new(ScriptedWorker::new("fixer", vec!["no marker here"]));
        let outcome = gate(1, worker.clone())
            .enforce(&Workspace::new("/tmp"), "implement")
            .await;
        match outcome {
            QualityOutcome::Failed { last_output, .. } => {
                assert_eq!(last_output.as_deref(), Some("no marker here"));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
        // max_retries = 2 -> three invocations
        assert_eq!(worker.call_count(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_check() {
        let dir = tempfile::tempdir().unwrap();
        let pass = CommandCheck::new(CheckSpec {
            name: "true".into(),
            command: "sh".into(),
            args: vec!["-c".into(), "exit 0".into()],
            timeout_secs: 10,
        });
        assert!(pass.run(dir.path()).await.is_none());

        let fail = CommandCheck::new(CheckSpec {
            name: "lint".into(),
            command: "sh".into(),
            args: vec!["-c".into(), "echo 'warning: unused'; exit 2".into()],
            timeout_secs: 10,
        });
        let v = fail.run(dir.path()).await.unwrap();
        assert_eq!(v.check, "lint");
        assert!(v.detail.starts_with("exit 2"));
        assert!(v.detail.contains("warning: unused"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_command_check_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let hung = CommandCheck::new(CheckSpec {
            name: "hang".into(),
            command: "sleep".into(),
            args: vec!["30".into()],
            timeout_secs: 1,
        });
        let started = std::time::Instant::now();
        let v = hung.run(dir.path()).await.unwrap();
        assert_eq!(v.check, "hang");
        assert_eq!(v.detail, "timed out after 1s");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("", 3), "");
    }
}
