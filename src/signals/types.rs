//! Structured fields a worker may emit as `KEY: value` lines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to an `ISSUE` line.
///
/// Ordered from least to most severe so `max()` picks the worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity tag, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "info" | "minor" => Some(Self::Low),
            "medium" | "warning" | "moderate" => Some(Self::Medium),
            "high" | "error" | "major" => Some(Self::High),
            "critical" | "blocker" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// One `ISSUE: <file:line> — <description>` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSignal {
    pub file: String,
    pub line: Option<u32>,
    pub description: String,
    pub severity: Severity,
}

/// One `FIX_APPLIED: <file:line> | <description>` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSignal {
    pub file: String,
    pub line: Option<u32>,
    pub description: String,
}

impl fmt::Display for FixSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{} | {}", self.file, line, self.description),
            None => write!(f, "{} | {}", self.file, self.description),
        }
    }
}

/// Where a `LESSON` line asks to be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonTarget {
    Project,
    Global,
    Both,
}

/// One `LESSON: <scope>/<category> — <text>` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSignal {
    pub target: LessonTarget,
    pub category: String,
    pub text: String,
}

/// Everything the grammar could extract from one raw worker output.
///
/// Absent fields are empty/`None`; whether that is an error is decided by
/// the step consuming the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub issues: Vec<IssueSignal>,
    /// Last `SCORE` line, clamped to 0..=100
    pub score: Option<u8>,
    pub fixes: Vec<FixSignal>,
    pub remaining: Vec<String>,
    pub lessons: Vec<LessonSignal>,
}

impl WorkerResponse {
    pub fn has_structured_data(&self) -> bool {
        !self.issues.is_empty()
            || self.score.is_some()
            || !self.fixes.is_empty()
            || !self.remaining.is_empty()
            || !self.lessons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_picks_worst() {
        let worst = [Severity::Low, Severity::Critical, Severity::Medium]
            .into_iter()
            .max();
        assert_eq!(worst, Some(Severity::Critical));
    }

    #[test]
    fn test_severity_parse_aliases() {
        assert_eq!(Severity::parse("ERROR"), Some(Severity::High));
        assert_eq!(Severity::parse(" low "), Some(Severity::Low));
        assert_eq!(Severity::parse("whatever"), None);
    }

    #[test]
    fn test_fix_signal_display() {
        let fix = FixSignal {
            file: "src/db.rs".into(),
            line: Some(12),
            description: "parameterized query".into(),
        };
        assert_eq!(fix.to_string(), "src/db.rs:12 | parameterized query");
    }
}
