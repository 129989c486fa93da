//! Review findings as reported by scanners and after deduplication.
//!
//! - [`Finding`]: one defect reported by one scanner
//! - [`CanonicalFinding`]: the merge of one or more findings judged to be the
//!   same underlying defect

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::signals::{IssueSignal, Severity};

/// A single reported defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Scanner (or scorer) that reported it
    pub source: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
}

impl Finding {
    pub fn new(
        source: impl Into<String>,
        file: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            file: file.into(),
            line: None,
            description: description.into(),
            severity: Severity::default(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn from_signal(source: &str, issue: &IssueSignal) -> Self {
        Self {
            source: source.to_string(),
            file: issue.file.clone(),
            line: issue.line,
            description: issue.description.clone(),
            severity: issue.severity,
        }
    }

    /// `file:line` or just `file`.
    pub fn location(&self) -> String {
        format_location(&self.file, self.line)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — [{}] {}", self.location(), self.severity, self.description)
    }
}

/// One defect after merging duplicate reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalFinding {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// The most specific of the merged descriptions
    pub description: String,
    /// Worst severity among the merged findings
    pub severity: Severity,
    /// Distinct reporting sources, sorted
    pub sources: Vec<String>,
    /// Number of raw findings merged into this one
    pub merged_count: usize,
}

impl CanonicalFinding {
    pub fn location(&self) -> String {
        format_location(&self.file, self.line)
    }

    /// Back to a plain finding, attributed to all of its sources.
    pub fn to_finding(&self) -> Finding {
        Finding {
            source: self.sources.join("+"),
            file: self.file.clone(),
            line: self.line,
            description: self.description.clone(),
            severity: self.severity,
        }
    }
}

impl From<Finding> for CanonicalFinding {
    fn from(finding: Finding) -> Self {
        Self {
            file: finding.file,
            line: finding.line,
            description: finding.description,
            severity: finding.severity,
            sources: vec![finding.source],
            merged_count: 1,
        }
    }
}

impl fmt::Display for CanonicalFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} — [{}] {} ({})",
            self.location(),
            self.severity,
            self.description,
            self.sources.join(", ")
        )
    }
}

fn format_location(file: &str, line: Option<u32>) -> String {
    match line {
        Some(line) => format!("{}:{}", file, line),
        None => file.to_string(),
    }
}

/// Render findings as `ISSUE:` lines for a worker task.
pub fn issue_lines<'a, I>(findings: I) -> String
where
    I: IntoIterator<Item = &'a Finding>,
{
    findings
        .into_iter()
        .map(|f| format!("ISSUE: {}\n", f))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_builder_and_display() {
        let finding = Finding::new("security", "src/db.rs", "SQL built with format!")
            .with_line(42)
            .with_severity(Severity::High);
        assert_eq!(finding.location(), "src/db.rs:42");
        assert_eq!(
            finding.to_string(),
            "src/db.rs:42 — [high] SQL built with format!"
        );
    }

    #[test]
    fn test_from_signal_keeps_fields() {
        let signal = IssueSignal {
            file: "a.rs".into(),
            line: None,
            description: "unused import".into(),
            severity: Severity::Low,
        };
        let finding = Finding::from_signal("lint", &signal);
        assert_eq!(finding.source, "lint");
        assert_eq!(finding.location(), "a.rs");
        assert_eq!(finding.severity, Severity::Low);
    }

    #[test]
    fn test_singleton_canonical() {
        let canonical: CanonicalFinding = Finding::new("perf", "x.rs", "clone in loop").into();
        assert_eq!(canonical.sources, vec!["perf".to_string()]);
        assert_eq!(canonical.merged_count, 1);
        assert_eq!(canonical.to_finding().source, "perf");
    }

    #[test]
    fn test_issue_lines_parse_back() {
        let findings = vec![
            Finding::new("s", "src/a.rs", "first").with_line(3),
            Finding::new("s", "src/b.rs", "second").with_severity(Severity::Critical),
        ];
        let text = issue_lines(&findings);
        let parsed = crate::signals::parse_response(&text);
        assert_eq!(parsed.issues.len(), 2);
        assert_eq!(parsed.issues[0].line, Some(3));
        assert_eq!(parsed.issues[0].description, "first");
        assert_eq!(parsed.issues[1].severity, Severity::Critical);
    }
}
