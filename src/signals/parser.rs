//! Line-oriented parser for the worker response grammar.
//!
//! Recognised lines (optionally prefixed by a `-` or `*` bullet):
//! - `ISSUE: <file:line> — [severity] <description>`
//! - `SCORE: <0-100>` or `SCORE: <n>/100`
//! - `FIX_APPLIED: <file:line> | <description>`
//! - `REMAINING: <description>`
//! - `LESSON: <project|global|both>/<category> — <text>`
//!
//! Unrecognised or malformed lines are ignored; nothing here fails.

use super::types::{
    FixSignal, IssueSignal, LessonSignal, LessonTarget, Severity, WorkerResponse,
};
use regex::Regex;
use std::sync::LazyLock;

static KEY_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]\s+)?(ISSUE|SCORE|FIX_APPLIED|REMAINING|LESSON)\s*:\s*(.*?)\s*$")
        .unwrap()
});

// Location, separator (em dash, double hyphen or spaced hyphen), description.
// A `:line` suffix anchors the location so a separator inside the path is kept.
static ISSUE_WITH_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+?:\d+(?::\d+)?)\s*(?:—|--|\s-\s)\s*(.+)$").unwrap()
});

static ISSUE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+?)\s*(?:—|--|\s-\s)\s*(.+)$").unwrap());

static SEVERITY_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\w+)\]\s*(.*)$").unwrap());

static SCORE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3})(?:\s*/\s*100)?\b").unwrap());

static LESSON_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(project|global|both)\s*/\s*([\w.-]+)\s*(?:—|--|\s-\s)\s*(.+)$").unwrap()
});

/// Parse every structured line out of a raw worker output.
pub fn parse_response(text: &str) -> WorkerResponse {
    let mut response = WorkerResponse::default();

    for line in text.lines() {
        let Some(cap) = KEY_LINE_REGEX.captures(line) else {
            continue;
        };
        let value = cap.get(2).map_or("", |m| m.as_str());
        if value.is_empty() {
            continue;
        }

        match &cap[1] {
            "ISSUE" => {
                if let Some(issue) = parse_issue(value) {
                    response.issues.push(issue);
                }
            }
            "SCORE" => {
                if let Some(score) = parse_score(value) {
                    response.score = Some(score);
                }
            }
            "FIX_APPLIED" => {
                if let Some(fix) = parse_fix(value) {
                    response.fixes.push(fix);
                }
            }
            "REMAINING" => response.remaining.push(value.to_string()),
            "LESSON" => {
                if let Some(lesson) = parse_lesson(value) {
                    response.lessons.push(lesson);
                }
            }
            _ => {}
        }
    }

    response
}

/// Split `file:line` (or `file:line:col`) into its parts.
///
/// A location without a numeric line yields `(location, None)`.
pub fn parse_location(location: &str) -> (String, Option<u32>) {
    let location = location.trim();
    if let Some((head, tail)) = location.rsplit_once(':')
        && let Ok(n) = tail.parse::<u32>()
    {
        // file:line:col: keep the line, drop the column
        if let Some((file, line)) = head.rsplit_once(':')
            && let Ok(line) = line.parse::<u32>()
        {
            return (file.to_string(), Some(line));
        }
        return (head.to_string(), Some(n));
    }
    (location.to_string(), None)
}

fn parse_issue(value: &str) -> Option<IssueSignal> {
    let cap = ISSUE_WITH_LINE_REGEX
        .captures(value)
        .or_else(|| ISSUE_REGEX.captures(value))?;
    let (file, line) = parse_location(&cap[1]);
    let rest = cap[2].trim();

    let (severity, description) = match SEVERITY_PREFIX_REGEX.captures(rest) {
        Some(sev) => match Severity::parse(&sev[1]) {
            Some(severity) => (severity, sev[2].trim().to_string()),
            None => (Severity::default(), rest.to_string()),
        },
        None => (Severity::default(), rest.to_string()),
    };

    if file.is_empty() || description.is_empty() {
        return None;
    }

    Some(IssueSignal {
        file,
        line,
        description,
        severity,
    })
}

fn parse_score(value: &str) -> Option<u8> {
    let cap = SCORE_REGEX.captures(value)?;
    let raw: u32 = cap[1].parse().ok()?;
    Some(raw.min(100) as u8)
}

fn parse_fix(value: &str) -> Option<FixSignal> {
    let (location, description) = value.split_once('|')?;
    let (file, line) = parse_location(location);
    let description = description.trim();
    if file.is_empty() || description.is_empty() {
        return None;
    }
    Some(FixSignal {
        file,
        line,
        description: description.to_string(),
    })
}

fn parse_lesson(value: &str) -> Option<LessonSignal> {
    let cap = LESSON_REGEX.captures(value)?;
    let target = match cap[1].to_ascii_lowercase().as_str() {
        "project" => LessonTarget::Project,
        "global" => LessonTarget::Global,
        _ => LessonTarget::Both,
    };
    Some(LessonSignal {
        target,
        category: cap[2].to_string(),
        text: cap[3].trim().to_string(),
    })
}
