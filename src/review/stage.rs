//! Scan, merge, then one fix invocation over the whole canonical list.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::dedup::FindingsDeduplicator;
use super::findings::CanonicalFinding;
use super::scanner::{ScanCoordinator, ScanReport};
use crate::config::ReviewConfig;
use crate::errors::WorkerError;
use crate::gates::{RetryController, RetryOutcome};
use crate::signals::{FixSignal, parse_response};
use crate::worker::{WorkerClient, WorkerRegistry};
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub scan: ScanReport,
    pub canonical: Vec<CanonicalFinding>,
    /// `None` when there was nothing to fix
    #[serde(skip)]
    pub fix: Option<RetryOutcome>,
    pub applied_fixes: Vec<FixSignal>,
}

impl ReviewOutcome {
    /// The fix call ran out of attempts without its marker.
    pub fn fix_failed(&self) -> bool {
        matches!(self.fix, Some(RetryOutcome::Exhausted { .. }))
    }
}

pub struct ReviewStage {
    coordinator: ScanCoordinator,
    dedup: FindingsDeduplicator,
    fixer: Arc<dyn WorkerClient>,
    fix_marker: String,
    retry: RetryController,
}

impl ReviewStage {
    pub fn new(
        coordinator: ScanCoordinator,
        dedup: FindingsDeduplicator,
        fixer: Arc<dyn WorkerClient>,
        fix_marker: &str,
        fix_max_retries: u32,
    ) -> Self {
        Self {
            coordinator,
            dedup,
            fixer,
            fix_marker: fix_marker.to_string(),
            retry: RetryController::new(fix_max_retries),
        }
    }

    pub fn from_config(config: &ReviewConfig, registry: &WorkerRegistry) -> Result<Self, WorkerError> {
        Ok(Self::new(
            ScanCoordinator::from_specs(&config.scanners, registry)?,
            FindingsDeduplicator::new(config.line_window, config.similarity_threshold),
            registry.get(&config.fix_worker)?,
            &config.fix_marker,
            config.fix_max_retries,
        ))
    }

    pub fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    pub async fn run(&self, workspace: &Workspace) -> ReviewOutcome {
        let scan = self.coordinator.scan_all(workspace).await;
        let canonical = self.dedup.merge(scan.all_findings());
        tracing::info!(
            raw = scan.total_findings(),
            canonical = canonical.len(),
            unavailable = scan.unavailable.len(),
            "review findings merged"
        );

        if canonical.is_empty() {
            return ReviewOutcome {
                scan,
                canonical,
                fix: None,
                applied_fixes: Vec::new(),
            };
        }

        let task = fix_task(&canonical, &self.fix_marker);
        let fix = {
            let _write = workspace.write().await;
            self.retry
                .invoke(self.fixer.as_ref(), &task, &workspace.scope(), &[&self.fix_marker])
                .await
        };
        let applied_fixes = if fix.is_passed() {
            parse_response(fix.output()).fixes
        } else {
            Vec::new()
        };

        ReviewOutcome {
            scan,
            canonical,
            fix: Some(fix),
            applied_fixes,
        }
    }
}

/// Task for the single fix invocation over every canonical finding.
pub fn fix_task(canonical: &[CanonicalFinding], marker: &str) -> String {
    let mut task = String::from(
        "Fix every issue below. They were merged from several independent reviews.\n\n## ISSUES\n",
    );
    for finding in canonical {
        task.push_str(&format!("ISSUE: {}\n", finding.to_finding()));
    }
    task.push_str(
        "\nFor every fix, output a line:\nFIX_APPLIED: <file:line> | <description>\n\n\
         When done, output:\n",
    );
    task.push_str(marker);
    task.push('\n');
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::Scanner;
    use crate::worker::testing::ScriptedWorker;

    const SCAN_A: &str = "ISSUE: src/db.rs:10 — SQL query built with string formatting\nSCAN COMPLETE";
    const SCAN_B: &str =
        "ISSUE: src/db.rs:12 — SQL query built with string formatting in `load`\nISSUE: src/api.rs:3 — missing auth check\nSCAN COMPLETE";

    fn stage(fixer: Arc<ScriptedWorker>, scans: Vec<&'static str>) -> ReviewStage {
        let scanners = scans
            .into_iter()
            .enumerate()
            .map(|(i, out)| {
                Scanner::new(
                    format!("s{i}"),
                    Arc::new(ScriptedWorker::new("scan", vec![out])),
                    "",
                    "SCAN COMPLETE",
                )
            })
            .collect();
        ReviewStage::new(
            ScanCoordinator::new(scanners),
            FindingsDeduplicator::default(),
            fixer,
            "FIXES APPLIED",
            2,
        )
    }

    #[tokio::test]
    async fn test_exactly_one_fix_invocation_for_all_findings() {
        let fixer = Arc::new(ScriptedWorker::new(
            "fixer",
            vec!["FIX_APPLIED: src/db.rs:12 | bind params\nFIX_APPLIED: src/api.rs:3 | add guard\nFIXES APPLIED"],
        ));
        let outcome = stage(fixer.clone(), vec![SCAN_A, SCAN_B])
            .run(&Workspace::new("/tmp"))
            .await;

        assert_eq!(outcome.scan.total_findings(), 3);
        assert_eq!(outcome.canonical.len(), 2);
        assert_eq!(fixer.call_count(), 1);

        let task = &fixer.tasks()[0];
        assert!(task.contains("src/db.rs:12"));
        assert!(task.contains("src/api.rs:3"));
        assert_eq!(outcome.applied_fixes.len(), 2);
        assert!(!outcome.fix_failed());
    }

    #[tokio::test]
    async fn test_no_findings_means_no_fix() {
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec!["FIXES APPLIED"]));
        let outcome = stage(fixer.clone(), vec!["all good\nSCAN COMPLETE"])
            .run(&Workspace::new("/tmp"))
            .await;
        assert!(outcome.canonical.is_empty());
        assert!(outcome.fix.is_none());
        assert_eq!(fixer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fix_gate_failure_is_reported() {
        let fixer = Arc::new(ScriptedWorker::new("fixer", vec!["I tried"]));
        let outcome = stage(fixer.clone(), vec![SCAN_A])
            .run(&Workspace::new("/tmp"))
            .await;
        assert!(outcome.fix_failed());
        assert!(outcome.applied_fixes.is_empty());
        assert_eq!(fixer.call_count(), 3);
    }
}
