use anyhow::Result;
use chrono::{DateTime, Utc};
use dialoguer::{Input, Select, theme::ColorfulTheme};
use serde::{Deserialize, Serialize};

/// Explicit external decision on an approval-gated phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Approve,
    /// Roll back to the snapshot and abandon the run.
    Reject,
    /// Halt without rolling back; the notes feed the phase on resume.
    Revise { notes: String },
}

impl Decision {
    pub fn allows_progression(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
            Self::Revise { .. } => write!(f, "revise"),
        }
    }
}

/// What the decider is shown.
#[derive(Debug, Clone)]
pub struct ApprovalContext {
    pub phase: String,
    pub output: String,
    pub snapshot_id: Option<String>,
}

impl ApprovalContext {
    /// Last `n` non-empty lines of the phase output.
    pub fn excerpt(&self, n: usize) -> Vec<&str> {
        let lines: Vec<&str> = self
            .output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        lines[lines.len().saturating_sub(n)..].to_vec()
    }
}

/// A decision that was made, kept on the run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub phase: String,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
}

/// Where decisions come from.
pub trait DecisionSource: Send + Sync {
    fn decide(&self, context: &ApprovalContext) -> Result<Decision>;
}

/// `--yes`: approve every gate.
pub struct AutoApprove;

impl DecisionSource for AutoApprove {
    fn decide(&self, _context: &ApprovalContext) -> Result<Decision> {
        println!("  {} (--yes flag)", console::style("Auto-approved").dim());
        Ok(Decision::Approve)
    }
}

/// Interactive terminal prompt.
pub struct InteractivePrompt;

impl DecisionSource for InteractivePrompt {
    fn decide(&self, context: &ApprovalContext) -> Result<Decision> {
        println!();
        println!(
            "  {} phase {} is waiting for approval",
            console::style("⏸").yellow(),
            console::style(&context.phase).bold()
        );
        for line in context.excerpt(8) {
            println!("    {}", console::style(line).dim());
        }

        let options = &[
            "Approve and continue",
            "Revise (halt, resume later with notes)",
            "Reject (roll back and abort)",
        ];

        let theme = ColorfulTheme::default();
        let selection = Select::with_theme(&theme)
            .with_prompt("Decision")
            .items(options)
            .default(0)
            .interact()?;

        match selection {
            0 => Ok(Decision::Approve),
            1 => {
                let notes: String = Input::with_theme(&theme)
                    .with_prompt("Revision notes")
                    .interact_text()?;
                Ok(Decision::Revise { notes })
            }
            2 => Ok(Decision::Reject),
            _ => unreachable!(),
        }
    }
}

/// The single suspension point for human judgment.
///
/// Every decision is recorded; the orchestrator refuses to pass an
/// approval-gated phase without one.
pub struct ApprovalGate {
    source: Box<dyn DecisionSource>,
    records: Vec<DecisionRecord>,
}

impl ApprovalGate {
    pub fn new(source: Box<dyn DecisionSource>) -> Self {
        Self {
            source,
            records: Vec::new(),
        }
    }

    pub fn auto(auto_approve: bool) -> Self {
        if auto_approve {
            Self::new(Box::new(AutoApprove))
        } else {
            Self::new(Box::new(InteractivePrompt))
        }
    }

    pub fn await_decision(&mut self, context: &ApprovalContext) -> Result<Decision> {
        let decision = self.source.decide(context)?;
        tracing::info!(phase = %context.phase, decision = %decision, "approval decision recorded");
        self.records.push(DecisionRecord {
            phase: context.phase.clone(),
            decision: decision.clone(),
            decided_at: Utc::now(),
        });
        Ok(decision)
    }

    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    pub fn last_decision_for(&self, phase: &str) -> Option<&Decision> {
        self.records
            .iter()
            .rev()
            .find(|r| r.phase == phase)
            .map(|r| &r.decision)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out pre-arranged decisions in order.
    pub struct ScriptedDecisions(Mutex<VecDeque<Decision>>);

    impl ScriptedDecisions {
        pub fn new(decisions: Vec<Decision>) -> Self {
            Self(Mutex::new(decisions.into()))
        }
    }

    impl DecisionSource for ScriptedDecisions {
        fn decide(&self, _context: &ApprovalContext) -> Result<Decision> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted decision left"))
        }
    }
}
