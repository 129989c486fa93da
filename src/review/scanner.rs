//! Concurrent fan-out of review scanners over a read-only workspace.
//!
//! Every scanner is started at once and the coordinator waits for all of
//! them (full join). A scanner that errors or never emits its marker is
//! logged and recorded as unavailable; it never fails the scan.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::findings::Finding;
use crate::config::ScannerSpec;
use crate::errors::WorkerError;
use crate::gates::{RetryController, RetryOutcome};
use crate::signals::parse_response;
use crate::worker::{WorkerClient, WorkerRegistry};
use crate::workspace::Workspace;

/// One review worker with its task and marker.
#[derive(Clone)]
pub struct Scanner {
    pub name: String,
    pub worker: Arc<dyn WorkerClient>,
    pub task: String,
    pub marker: String,
    pub max_retries: u32,
}

impl Scanner {
    pub fn new(
        name: impl Into<String>,
        worker: Arc<dyn WorkerClient>,
        task: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            worker,
            task: task.into(),
            marker: marker.into(),
            max_retries: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn from_spec(spec: &ScannerSpec, registry: &WorkerRegistry) -> Result<Self, WorkerError> {
        Ok(Self::new(
            spec.name.clone(),
            registry.get(&spec.worker)?,
            spec.task.clone(),
            spec.marker.clone(),
        )
        .with_max_retries(spec.max_retries))
    }

    fn build_task(&self) -> String {
        let task = if self.task.trim().is_empty() {
            format!("Review the workspace as the '{}' reviewer.", self.name)
        } else {
            self.task.clone()
        };
        format!(
            "{task}\n\n\
             This is a read-only review. Do not modify any file.\n\
             Report every defect on its own line as:\n\
             ISSUE: <file:line> — [critical|high|medium|low] <description>\n\n\
             When the review is finished, output:\n{}\n",
            self.marker
        )
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("name", &self.name)
            .field("worker", &self.worker.name())
            .field("marker", &self.marker)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Findings from one scanner that completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scanner: String,
    pub findings: Vec<Finding>,
    pub attempts: u32,
}

/// A scanner that could not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanUnavailable {
    pub scanner: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// In declared scanner order
    pub results: Vec<ScanResult>,
    pub unavailable: Vec<ScanUnavailable>,
}

impl ScanReport {
    /// One finding list per completed scanner.
    pub fn finding_lists(&self) -> Vec<Vec<Finding>> {
        self.results.iter().map(|r| r.findings.clone()).collect()
    }

    pub fn all_findings(&self) -> Vec<Finding> {
        self.results
            .iter()
            .flat_map(|r| r.findings.iter().cloned())
            .collect()
    }

    pub fn total_findings(&self) -> usize {
        self.results.iter().map(|r| r.findings.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanCoordinator {
    scanners: Vec<Scanner>,
}

impl ScanCoordinator {
    pub fn new(scanners: Vec<Scanner>) -> Self {
        Self { scanners }
    }

    pub fn from_specs(specs: &[ScannerSpec], registry: &WorkerRegistry) -> Result<Self, WorkerError> {
        let scanners = specs
            .iter()
            .map(|spec| Scanner::from_spec(spec, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(scanners))
    }

    pub fn scanners(&self) -> &[Scanner] {
        &self.scanners
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    /// Run every scanner concurrently and join all of them.
    ///
    /// The workspace read guard is held for the whole fan-out.
    pub async fn scan_all(&self, workspace: &Workspace) -> ScanReport {
        let _read = workspace.read().await;
        let scope = workspace.read_only_scope();

        tracing::info!(scanners = self.scanners.len(), "starting review scan");

        let futures: Vec<_> = self
            .scanners
            .iter()
            .map(|scanner| {
                let scope = scope.clone();
                async move {
                    let task = scanner.build_task();
                    let outcome = RetryController::new(scanner.max_retries)
                        .invoke(scanner.worker.as_ref(), &task, &scope, &[&scanner.marker])
                        .await;
                    (scanner, outcome)
                }
            })
            .collect();

        let mut report = ScanReport::default();
        for (scanner, outcome) in join_all(futures).await {
            match outcome {
                RetryOutcome::Passed { output, attempts } => {
                    let findings: Vec<Finding> = parse_response(&output)
                        .issues
                        .iter()
                        .map(|issue| Finding::from_signal(&scanner.name, issue))
                        .collect();
                    tracing::info!(scanner = %scanner.name, findings = findings.len(), "scanner finished");
                    report.results.push(ScanResult {
                        scanner: scanner.name.clone(),
                        findings,
                        attempts,
                    });
                }
                RetryOutcome::Exhausted { last_output, attempts } => {
                    let reason = unavailable_reason(&last_output, &scanner.marker);
                    tracing::warn!(scanner = %scanner.name, attempts, %reason, "scanner unavailable, skipping");
                    report.unavailable.push(ScanUnavailable {
                        scanner: scanner.name.clone(),
                        reason,
                    });
                }
            }
        }

        report
    }
}

fn unavailable_reason(last_output: &str, marker: &str) -> String {
    if let Some(error) = last_output.strip_prefix("[worker error] ") {
        error.to_string()
    } else {
        format!("output never contained marker '{}'", marker)
    }
}
