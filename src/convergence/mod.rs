//! Bounded fix → rescore iteration.
//!
//! Starting from an initial [`Assessment`], each iteration hands the full
//! open-issue list to a fix worker and then asks a scoring worker for a new
//! score and issue list. After every iteration the exit conditions are checked
//! in this order:
//!
//! 1. no open issues → [`ConvergenceExit::Converged`]
//! 2. score did not improve → [`ConvergenceExit::Stagnated`]
//! 3. iteration cap reached → [`ConvergenceExit::Exhausted`]
//!
//! The cap is checked before each fix, so including the initial assessment
//! the scorer is called at most `max_iterations + 1` times.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::ConvergenceConfig;
use crate::errors::WorkerError;
use crate::gates::{GateValidator, RetryController, RetryOutcome};
use crate::review::{Finding, issue_lines};
use crate::signals::parse_response;
use crate::worker::{WorkerClient, WorkerRegistry};
use crate::workspace::Workspace;

/// Fix/rescore iterations allowed per run; also the ceiling for configured caps.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Score and open issues at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub score: u8,
    pub issues: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// 0 is the initial assessment
    pub iteration: u32,
    pub score: u8,
    pub open_issues: Vec<Finding>,
    pub applied_fixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "exit", rename_all = "kebab-case")]
pub enum ConvergenceExit {
    Converged,
    Stagnated,
    Exhausted,
    /// A fix or scoring call never passed its gate
    Halted { step: String, last_output: String },
}

impl fmt::Display for ConvergenceExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::Stagnated => write!(f, "stagnated"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Halted { step, .. } => write!(f, "halted at {}", step),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub records: Vec<ScoreRecord>,
    pub exit: ConvergenceExit,
}

impl ConvergenceReport {
    pub fn final_score(&self) -> Option<u8> {
        self.records.last().map(|r| r.score)
    }

    /// Issues still open when the loop stopped.
    pub fn residual_issues(&self) -> &[Finding] {
        self.records
            .last()
            .map(|r| r.open_issues.as_slice())
            .unwrap_or_default()
    }

    /// Iterations performed after the initial assessment.
    pub fn iterations(&self) -> u32 {
        self.records.last().map(|r| r.iteration).unwrap_or(0)
    }

    pub fn applied_fixes(&self) -> Vec<String> {
        self.records
            .iter()
            .flat_map(|r| r.applied_fixes.iter().cloned())
            .collect()
    }
}

pub struct ConvergenceLoop {
    scorer: Arc<dyn WorkerClient>,
    score_marker: String,
    score_task: String,
    fixer: Arc<dyn WorkerClient>,
    fix_marker: String,
    max_iterations: u32,
    retry: RetryController,
}

impl ConvergenceLoop {
    pub fn new(
        scorer: Arc<dyn WorkerClient>,
        score_marker: &str,
        fixer: Arc<dyn WorkerClient>,
        fix_marker: &str,
    ) -> Self {
        Self {
            scorer,
            score_marker: score_marker.to_string(),
            score_task: String::new(),
            fixer,
            fix_marker: fix_marker.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry: RetryController::new(crate::phase::DEFAULT_MAX_RETRIES),
        }
    }

    pub fn with_score_task(mut self, task: &str) -> Self {
        self.score_task = task.to_string();
        self
    }

    /// Values above [`DEFAULT_MAX_ITERATIONS`] are clamped to it.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.min(DEFAULT_MAX_ITERATIONS);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryController::new(max_retries);
        self
    }

    pub fn from_config(
        config: &ConvergenceConfig,
        registry: &WorkerRegistry,
    ) -> Result<Self, WorkerError> {
        Ok(Self::new(
            registry.get(&config.scorer)?,
            &config.score_marker,
            registry.get(&config.fixer)?,
            &config.fix_marker,
        )
        .with_score_task(&config.score_task)
        .with_max_iterations(config.max_iterations)
        .with_max_retries(config.max_retries))
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Ask the scorer for a score and issue list.
    ///
    /// The output must carry both the marker and a `SCORE` line.
    pub async fn assess(&self, workspace: &Workspace) -> Result<Assessment, RetryOutcome> {
        let task = self.build_score_task();
        let scope = workspace.read_only_scope();
        let marker = self.score_marker.as_str();

        let outcome = {
            let _read = workspace.read().await;
            self.retry
                .run(
                    |_| self.scorer.execute(&task, &scope),
                    |output| {
                        GateValidator::check(output, marker) && parse_response(output).score.is_some()
                    },
                )
                .await
        };

        match outcome {
            RetryOutcome::Passed { output, .. } => {
                let response = parse_response(&output);
                Ok(Assessment {
                    score: response.score.unwrap_or_default(),
                    issues: response
                        .issues
                        .iter()
                        .map(|issue| Finding::from_signal(self.scorer.name(), issue))
                        .collect(),
                })
            }
            exhausted => Err(exhausted),
        }
    }

    /// Iterate from `initial` until an exit condition holds.
    pub async fn run(&self, workspace: &Workspace, initial: Assessment) -> ConvergenceReport {
        let mut previous_score = initial.score;
        let mut open_issues = initial.issues;
        let mut records = vec![ScoreRecord {
            iteration: 0,
            score: previous_score,
            open_issues: open_issues.clone(),
            applied_fixes: Vec::new(),
        }];

        if open_issues.is_empty() {
            return ConvergenceReport {
                records,
                exit: ConvergenceExit::Converged,
            };
        }

        let mut iteration = 0;
        let exit = loop {
            if iteration >= self.max_iterations {
                break ConvergenceExit::Exhausted;
            }
            iteration += 1;

            let task = self.build_fix_task(&open_issues);
            let fix = {
                let _write = workspace.write().await;
                self.retry
                    .invoke(self.fixer.as_ref(), &task, &workspace.scope(), &[&self.fix_marker])
                    .await
            };
            let fix_output = match fix {
                RetryOutcome::Passed { output, .. } => output,
                RetryOutcome::Exhausted { last_output, .. } => {
                    break ConvergenceExit::Halted {
                        step: format!("fix (iteration {iteration})"),
                        last_output,
                    };
                }
            };
            let applied_fixes: Vec<String> = parse_response(&fix_output)
                .fixes
                .iter()
                .map(|f| f.to_string())
                .collect();

            let assessment = match self.assess(workspace).await {
                Ok(assessment) => assessment,
                Err(outcome) => {
                    break ConvergenceExit::Halted {
                        step: format!("score (iteration {iteration})"),
                        last_output: outcome.output().to_string(),
                    };
                }
            };

            tracing::info!(
                iteration,
                score = assessment.score,
                previous = previous_score,
                open_issues = assessment.issues.len(),
                "convergence iteration scored"
            );

            let stagnated = assessment.score <= previous_score;
            previous_score = assessment.score;
            open_issues = assessment.issues;
            records.push(ScoreRecord {
                iteration,
                score: previous_score,
                open_issues: open_issues.clone(),
                applied_fixes,
            });

            if open_issues.is_empty() {
                break ConvergenceExit::Converged;
            }
            if stagnated {
                break ConvergenceExit::Stagnated;
            }
        };

        ConvergenceReport { records, exit }
    }

    fn build_score_task(&self) -> String {
        let task = if self.score_task.trim().is_empty() {
            "Score the current state of the workspace."
        } else {
            self.score_task.as_str()
        };
        format!(
            "{task}\n\n\
             Do not modify any file.\n\
             Output the score as:\nSCORE: <0-100>\n\
             and every remaining issue as:\nISSUE: <file:line> — [severity] <description>\n\n\
             When done, output:\n{}\n",
            self.score_marker
        )
    }

    fn build_fix_task(&self, issues: &[Finding]) -> String {
        format!(
            "Fix all of the following open issues.\n\n## ISSUES\n{}\n\
             For every fix, output a line:\nFIX_APPLIED: <file:line> | <description>\n\n\
             When done, output:\n{}\n",
            issue_lines(issues),
            self.fix_marker
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::ScriptedWorker;

    fn scored(score: u8, issues: usize) -> String {
        let mut out = format!("SCORE: {score}\n");
        for i in 0..issues {
            out.push_str(&format!("ISSUE: src/lib.rs:{} — problem number {}\n", i + 1, i));
        }
        out.push_str("SCORE COMPLETE\n");
        out
    }

    fn initial(score: u8, issues: usize) -> Assessment {
        Assessment {
            score,
            issues: (0..issues)
                .map(|i| Finding::new("scorer", "src/lib.rs", format!("issue {i}")))
                .collect(),
        }
    }

    fn scorer(outputs: Vec<String>) -> Arc<ScriptedWorker> {
        Arc::new(ScriptedWorker::with_results(
            "scorer",
            outputs.into_iter().map(Ok).collect(),
        ))
    }

    fn looping(scorer: &Arc<ScriptedWorker>, fixer: &Arc<ScriptedWorker>) -> ConvergenceLoop {
        ConvergenceLoop::new(scorer.clone(), "SCORE COMPLETE", fixer.clone(), "FIXES APPLIED")
    }

    #[tokio::test]
    async fn test_stagnation_stops_the_loop() {
        let scorer = scorer(vec![scored(60, 2), scored(60, 1)]);
        let fixer = Arc::new(ScriptedWorker::new(
            "fixer",
            vec!["FIX_APPLIED: src/lib.rs:1 | tightened bounds\nFIXES APPLIED"],
        ));

        let report = looping(&scorer, &fixer)
            .run(&Workspace::new("/tmp"), initial(40, 5))
            .await;

        assert_eq!(report.exit, ConvergenceExit::Stagnated);
        assert_eq!(report.iterations(), 2);
        assert_eq!(report.final_score(), Some(60));
        assert_eq!(report.residual_issues().len(), 1);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.records[1].open_issues.len(), 2);
        assert_eq!(report.applied_fixes().len(), 2);
        assert_eq!(fixer.call_count(), 2);
        assert_eq!(scorer.call_count(), 2);
    }

    #[tokio::test]
    async fn test_converges_when_issues_cleared() {
        let scorer = scorer(vec![scored(95, 0)]);
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec!["FIXES APPLIED"]));
        let report = looping(&scorer, &fixer)
            .run(&Workspace::new("/tmp"), initial(50, 3))
            .await;
        assert_eq!(report.exit, ConvergenceExit::Converged);
        assert!(report.residual_issues().is_empty());
        assert_eq!(report.final_score(), Some(95));
    }

    #[tokio::test]
    async fn test_empty_issue_list_does_no_work() {
        let scorer = Arc::new(ScriptedWorker::new("scorer", vec![]));
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec![]));
        let report = looping(&scorer, &fixer)
            .run(&Workspace::new("/tmp"), initial(80, 0))
            .await;
        assert_eq!(report.exit, ConvergenceExit::Converged);
        assert_eq!(report.iterations(), 0);
        assert_eq!(fixer.call_count(), 0);
        assert_eq!(scorer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cap_bounds_scoring_calls() {
        let scorer = scorer(vec![scored(10, 4), scored(20, 4), scored(30, 4), scored(40, 4)]);
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec!["FIXES APPLIED"]));
        let converge = looping(&scorer, &fixer);
        let ws = Workspace::new("/tmp");

        let start = converge.assess(&ws).await.unwrap();
        let report = converge.run(&ws, start).await;

        assert_eq!(report.exit, ConvergenceExit::Exhausted);
        assert_eq!(report.iterations(), 3);
        assert_eq!(report.final_score(), Some(40));
        assert_eq!(scorer.call_count() as u32, converge.max_iterations() + 1);
    }

    #[tokio::test]
    async fn test_zero_cap_never_invokes_the_fixer() {
        let scorer = scorer(vec![scored(10, 4), scored(20, 4)]);
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec!["FIXES APPLIED"]));
        let converge = looping(&scorer, &fixer).with_max_iterations(0);
        let ws = Workspace::new("/tmp");

        let start = converge.assess(&ws).await.unwrap();
        let report = converge.run(&ws, start).await;

        assert_eq!(report.exit, ConvergenceExit::Exhausted);
        assert_eq!(report.iterations(), 0);
        assert_eq!(report.residual_issues().len(), 4);
        assert_eq!(fixer.call_count(), 0);
        assert_eq!(scorer.call_count(), 1);
    }

    #[test]
    fn test_cap_is_clamped_to_the_ceiling() {
        let scorer = scorer(vec![]);
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec![]));
        let converge = looping(&scorer, &fixer).with_max_iterations(10);
        assert_eq!(converge.max_iterations(), DEFAULT_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn test_score_line_is_required() {
        let scorer = Arc::new(ScriptedWorker::new("scorer", vec!["SCORE COMPLETE"]));
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec![]));
        let converge = looping(&scorer, &fixer).with_max_retries(1);
        let result = converge.assess(&Workspace::new("/tmp")).await;
        assert!(result.is_err());
        assert_eq!(scorer.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fix_gate_failure_halts_with_output() {
        let scorer = Arc::new(ScriptedWorker::new("scorer", vec![]));
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec!["gave up"]));
        let report = looping(&scorer, &fixer)
            .with_max_retries(0)
            .run(&Workspace::new("/tmp"), initial(50, 2))
            .await;
        match &report.exit {
            ConvergenceExit::Halted { step, last_output } => {
                assert!(step.starts_with("fix"));
                assert_eq!(last_output, "gave up");
            }
            other => panic!("Expected Halted, got {other:?}"),
        }
        assert_eq!(report.residual_issues().len(), 2);
    }

    #[tokio::test]
    async fn test_fix_task_lists_every_issue() {
        let scorer = scorer(vec![scored(90, 0)]);
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec!["FIXES APPLIED"]));
        looping(&scorer, &fixer)
            .run(&Workspace::new("/tmp"), initial(50, 3))
            .await;
        let task = &fixer.tasks()[0];
        assert_eq!(task.matches("ISSUE: ").count(), 3);
    }
}
