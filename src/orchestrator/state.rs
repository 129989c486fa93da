use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::gates::{DecisionRecord, Violation};
use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    AwaitingApproval,
    Failed,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Failed => "failed",
            Self::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// Why a run stopped before completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum HaltReason {
    GateFailure {
        phase: String,
        attempts: u32,
        last_output: String,
    },
    Incomplete {
        phase: String,
        remaining: Vec<String>,
        last_output: String,
    },
    QualityViolations {
        phase: String,
        violations: Vec<Violation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_output: Option<String>,
    },
    Rejected {
        phase: String,
        snapshot_id: String,
    },
    RevisionRequested {
        phase: String,
        notes: String,
    },
    ReviewFixFailed {
        last_output: String,
    },
    ConvergenceHalted {
        step: String,
        last_output: String,
    },
}

impl HaltReason {
    /// Raw worker output or violation list kept for diagnosis.
    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            Self::GateFailure { last_output, .. }
            | Self::ReviewFixFailed { last_output }
            | Self::ConvergenceHalted { last_output, .. } => vec![last_output.clone()],
            Self::Incomplete {
                remaining,
                last_output,
                ..
            } => {
                let mut lines: Vec<String> =
                    remaining.iter().map(|r| format!("remaining: {}", r)).collect();
                lines.push(last_output.clone());
                lines
            }
            Self::QualityViolations {
                violations,
                last_output,
                ..
            } => violations
                .iter()
                .map(|v| v.to_string())
                .chain(last_output.clone())
                .collect(),
            Self::Rejected { .. } => Vec::new(),
            Self::RevisionRequested { notes, .. } => vec![format!("notes: {}", notes)],
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GateFailure { phase, attempts, .. } => write!(
                f,
                "phase '{}' never emitted its completion marker ({} attempts)",
                phase, attempts
            ),
            Self::Incomplete {
                phase, remaining, ..
            } => write!(
                f,
                "phase '{}' still has {} item(s) of remaining work",
                phase,
                remaining.len()
            ),
            Self::QualityViolations {
                phase, violations, ..
            } => write!(
                f,
                "quality gate after phase '{}' still reports {} violation(s)",
                phase,
                violations.len()
            ),
            Self::Rejected { phase, snapshot_id } => write!(
                f,
                "phase '{}' rejected; workspace restored to snapshot {}",
                phase, snapshot_id
            ),
            Self::RevisionRequested { phase, .. } => write!(
                f,
                "revision requested for phase '{}'; resume with --resume",
                phase
            ),
            Self::ReviewFixFailed { .. } => write!(f, "review fix invocation never completed"),
            Self::ConvergenceHalted { step, .. } => {
                write!(f, "convergence {} never passed its gate", step)
            }
        }
    }
}

/// Persistent record of one pipeline run.
///
/// `cursor` counts completed phases: it only moves forward, and only when a
/// phase has passed its gates (and, for approval-gated phases, been approved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub target: PathBuf,
    pub phases: Vec<Phase>,
    pub cursor: usize,
    pub status: RunStatus,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
    /// Notes from a `revise` decision, fed to the phase at `cursor` on resume
    #[serde(default)]
    pub revision_notes: Option<String>,
    #[serde(default)]
    pub halt: Option<HaltReason>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(target: &Path, phases: Vec<Phase>) -> Self {
        let now = Utc::now();
        Self {
            id: now.format("%Y%m%d-%H%M%S").to_string()
                + "-"
                + &uuid::Uuid::new_v4().simple().to_string()[..6],
            target: target.to_path_buf(),
            phases,
            cursor: 0,
            status: RunStatus::Pending,
            snapshot_id: None,
            decisions: Vec::new(),
            revision_notes: None,
            halt: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.get(self.cursor)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.phases.len()
    }

    /// Mark the phase at the cursor done and move to the next one.
    pub fn advance(&mut self) {
        if !self.is_finished() {
            self.cursor += 1;
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.status == RunStatus::AwaitingApproval
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run state {}", path.display()))?;
        let run = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run state {}", path.display()))?;
        Ok(Some(run))
    }

    /// Write the run atomically (temp file + rename).
    pub fn save(&mut self, path: &Path) -> Result<(), PipelineError> {
        self.updated_at = Utc::now();
        let write_failed = |source| PipelineError::StateWriteFailed {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_failed(std::io::Error::other(e)))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(write_failed)?;
        fs::rename(&tmp, path).map_err(write_failed)?;
        Ok(())
    }
}

/// One line of the phase outcome log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub phase: String,
    pub attempts: u32,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only `phase|attempts|status|timestamp` log.
pub struct StateManager {
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn save(&self, phase: &str, attempts: u32, status: &str) -> Result<()> {
        let entry = format!(
            "{}|{}|{}|{}\n",
            phase,
            attempts,
            status,
            Utc::now().to_rfc3339()
        );

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .context("Failed to open state file")?
            .write_all(entry.as_bytes())
            .context("Failed to write state entry")?;

        Ok(())
    }

    pub fn get_entries(&self) -> Result<Vec<StateEntry>> {
        if !self.state_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;

        let entries = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split('|').collect();
                if parts.len() < 4 {
                    return None;
                }
                Some(StateEntry {
                    phase: parts[0].to_string(),
                    attempts: parts[1].parse().unwrap_or(0),
                    status: parts[2].to_string(),
                    timestamp: DateTime::parse_from_rfc3339(parts[3])
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect();

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::Decision;
    use tempfile::tempdir;

    fn phases() -> Vec<Phase> {
        vec![
            Phase::new("plan", "w", "", "PLAN COMPLETE"),
            Phase::new("build", "w", "", "BUILD COMPLETE"),
        ]
    }

    #[test]
    fn test_cursor_only_moves_forward_to_the_end() {
        let mut run = PipelineRun::new(Path::new("/repo"), phases());
        assert_eq!(run.current_phase().unwrap().name, "plan");
        run.advance();
        assert_eq!(run.current_phase().unwrap().name, "build");
        run.advance();
        run.advance();
        assert!(run.is_finished());
        assert_eq!(run.cursor, 2);
    }

    #[test]
    fn test_run_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut run = PipelineRun::new(dir.path(), phases());
        run.status = RunStatus::AwaitingApproval;
        run.snapshot_id = Some("snap-1".into());
        run.revision_notes = Some("smaller steps".into());
        run.decisions.push(DecisionRecord {
            phase: "plan".into(),
            decision: Decision::Revise {
                notes: "smaller steps".into(),
            },
            decided_at: Utc::now(),
        });
        run.halt = Some(HaltReason::RevisionRequested {
            phase: "plan".into(),
            notes: "smaller steps".into(),
        });
        run.save(&path).unwrap();

        let loaded = PipelineRun::load(&path).unwrap().unwrap();
        assert_eq!(loaded, run);
        assert!(loaded.is_resumable());
        assert!(!dir.path().join("run.json.tmp").exists());

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains(r#""status": "awaiting-approval""#));
        assert!(json.contains(r#""reason": "revision-requested""#));
    }

    #[test]
    fn test_load_missing_run() {
        let dir = tempdir().unwrap();
        assert!(PipelineRun::load(&dir.path().join("run.json")).unwrap().is_none());
    }

    #[test]
    fn test_state_manager_lines() {
        let dir = tempdir().unwrap();
        let state = StateManager::new(dir.path().join("state"));
        state.save("plan", 1, "completed").unwrap();
        state.save("build", 3, "gate-failed").unwrap();

        let entries = state.get_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].attempts, 3);
        assert_eq!(entries[1].status, "gate-failed");
        assert_eq!(entries[0].phase, "plan");
    }

    #[test]
    fn test_halt_diagnostics() {
        let halt = HaltReason::QualityViolations {
            phase: "build".into(),
            violations: vec![Violation {
                check: "lint".into(),
                detail: "exit 1: unused".into(),
            }],
            last_output: None,
        };
        assert_eq!(halt.diagnostics(), vec!["[lint] exit 1: unused".to_string()]);
        assert!(halt.to_string().contains("1 violation"));
    }
}
