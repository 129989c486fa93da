//! Phase definitions for a pipeline.
//!
//! A pipeline is an ordered, immutable list of [`Phase`]s declared in
//! `pipeline.toml` before the run starts.

use serde::{Deserialize, Serialize};

/// Default retry bound for a phase's completion gate.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default token a loopable phase emits when work remains.
pub const DEFAULT_MORE_WORK_MARKER: &str = "MORE WORK REMAINS";

/// How the pipeline treats a phase once its worker has answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    /// Single gated invocation.
    #[default]
    Normal,
    /// May signal partial completion and be re-invoked on the remaining work.
    Loopable,
    /// Suspends the pipeline for an explicit decision once it completes.
    ApprovalGated,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseKind::Normal => write!(f, "normal"),
            PhaseKind::Loopable => write!(f, "loopable"),
            PhaseKind::ApprovalGated => write!(f, "approval-gated"),
        }
    }
}

/// A single declared unit of orchestrated work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    /// Unique name of the phase
    pub name: String,
    /// Name of the worker (under `[workers]`) that performs this phase
    pub worker: String,
    /// Task description handed to the worker
    #[serde(default)]
    pub task: String,
    /// Exact token proving the phase finished
    pub marker: String,
    /// Re-invocations allowed after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub kind: PhaseKind,
    /// Run the quality gate against the workspace after this phase
    #[serde(default)]
    pub quality_gate: bool,
    /// Token a loopable phase emits when work remains
    #[serde(default = "default_more_work_marker")]
    pub more_work_marker: String,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_more_work_marker() -> String {
    DEFAULT_MORE_WORK_MARKER.to_string()
}

impl Phase {
    /// Create a normal phase with default retry bound.
    pub fn new(name: &str, worker: &str, task: &str, marker: &str) -> Self {
        Self {
            name: name.to_string(),
            worker: worker.to_string(),
            task: task.to_string(),
            marker: marker.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            kind: PhaseKind::Normal,
            quality_gate: false,
            more_work_marker: DEFAULT_MORE_WORK_MARKER.to_string(),
        }
    }

    pub fn with_kind(mut self, kind: PhaseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_quality_gate(mut self) -> Self {
        self.quality_gate = true;
        self
    }

    pub fn is_loopable(&self) -> bool {
        self.kind == PhaseKind::Loopable
    }

    pub fn is_approval_gated(&self) -> bool {
        self.kind == PhaseKind::ApprovalGated
    }

    /// Markers a worker may emit to pass this phase's gate.
    ///
    /// Loopable phases also accept the more-work marker, since partial
    /// completion is a valid answer rather than a gate failure.
    pub fn accepted_markers(&self) -> Vec<&str> {
        if self.is_loopable() {
            vec![self.marker.as_str(), self.more_work_marker.as_str()]
        } else {
            vec![self.marker.as_str()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_defaults_from_toml() {
        let phase: Phase = toml::from_str(
            r#"
            name = "implement"
            worker = "builder"
            marker = "IMPLEMENT COMPLETE"
            "#,
        )
        .unwrap();
        assert_eq!(phase.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(phase.kind, PhaseKind::Normal);
        assert!(!phase.quality_gate);
        assert_eq!(phase.more_work_marker, DEFAULT_MORE_WORK_MARKER);
        assert!(phase.task.is_empty());
    }

    #[test]
    fn test_phase_kind_kebab_case() {
        let phase: Phase = toml::from_str(
            r#"
            name = "plan"
            worker = "builder"
            marker = "PLAN COMPLETE"
            kind = "approval-gated"
            "#,
        )
        .unwrap();
        assert!(phase.is_approval_gated());
        assert_eq!(phase.kind.to_string(), "approval-gated");
    }

    #[test]
    fn test_accepted_markers_by_kind() {
        let normal = Phase::new("a", "w", "t", "DONE");
        assert_eq!(normal.accepted_markers(), vec!["DONE"]);

        let loopable = Phase::new("b", "w", "t", "DONE").with_kind(PhaseKind::Loopable);
        assert_eq!(
            loopable.accepted_markers(),
            vec!["DONE", DEFAULT_MORE_WORK_MARKER]
        );
    }
}
