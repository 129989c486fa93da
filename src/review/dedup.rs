//! Merging overlapping findings into one canonical list.
//!
//! Two findings describe the same defect when they are in the same file,
//! their lines are within `line_window` of each other, and the word-set
//! Jaccard similarity of their descriptions reaches `threshold`. A finding
//! without a line only matches another finding without a line.
//!
//! Merging runs to a fixpoint and the result is sorted, so
//! `merge(merge(x)) == merge(x)`.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use super::findings::CanonicalFinding;

pub const DEFAULT_LINE_WINDOW: u32 = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

/// Lower-cased words, split on anything that is not alphanumeric or `_`.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Word-set Jaccard similarity; 0.0 when either side has no words.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a = word_set(a);
    let words_b = word_set(b);

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    intersection as f64 / union as f64
}

/// Coarse score of how concrete a description is.
///
/// Length, plus a bonus for every token that looks like an identifier or
/// path: `snake_case`, `a::b`, `a.b`, `a/b`, `call()`, backticked code,
/// or camelCase.
pub fn specificity(description: &str) -> usize {
    let identifiers = description
        .split_whitespace()
        .filter(|token| looks_like_identifier(token))
        .count();
    description.trim().len() + identifiers * 10
}

fn looks_like_identifier(token: &str) -> bool {
    let token = token.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '\'' | '"'));
    if token.starts_with('`') {
        return true;
    }
    let inner = token.trim_end_matches('.');
    if inner.contains("::") || inner.contains('_') || inner.contains('/') || inner.contains('(') {
        return true;
    }
    if let Some((a, b)) = inner.split_once('.')
        && !a.is_empty()
        && !b.is_empty()
    {
        return true;
    }
    let mut chars = inner.chars();
    match chars.next() {
        Some(first) if first.is_lowercase() => chars.any(|c| c.is_uppercase()),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindingsDeduplicator {
    line_window: u32,
    threshold: f64,
}

impl Default for FindingsDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_WINDOW, DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl FindingsDeduplicator {
    pub fn new(line_window: u32, threshold: f64) -> Self {
        Self {
            line_window,
            threshold,
        }
    }

    /// Merge all findings into a deterministic canonical list.
    pub fn merge<I, F>(&self, findings: I) -> Vec<CanonicalFinding>
    where
        I: IntoIterator<Item = F>,
        F: Into<CanonicalFinding>,
    {
        let mut items: Vec<CanonicalFinding> = findings.into_iter().map(Into::into).collect();
        items.sort_by(canonical_order);

        loop {
            let mut merged_any = false;
            let mut out: Vec<CanonicalFinding> = Vec::with_capacity(items.len());
            for item in items {
                match out.iter_mut().find(|existing| self.same_defect(existing, &item)) {
                    Some(existing) => {
                        absorb(existing, item);
                        merged_any = true;
                    }
                    None => out.push(item),
                }
            }
            items = out;
            if !merged_any {
                break;
            }
        }

        items.sort_by(canonical_order);
        tracing::debug!(canonical = items.len(), "findings merged");
        items
    }

    pub fn same_defect(&self, a: &CanonicalFinding, b: &CanonicalFinding) -> bool {
        if a.file != b.file {
            return false;
        }
        let lines_close = match (a.line, b.line) {
            (Some(x), Some(y)) => x.abs_diff(y) <= self.line_window,
            (None, None) => true,
            _ => false,
        };
        lines_close && jaccard_similarity(&a.description, &b.description) >= self.threshold
    }
}

fn absorb(into: &mut CanonicalFinding, other: CanonicalFinding) {
    into.severity = into.severity.max(other.severity);
    into.merged_count += other.merged_count;

    let sources: BTreeSet<String> = into.sources.drain(..).chain(other.sources).collect();
    into.sources = sources.into_iter().collect();

    let ours = specificity(&into.description);
    let theirs = specificity(&other.description);
    if theirs > ours || (theirs == ours && other.description < into.description) {
        into.description = other.description;
        into.line = other.line;
    }
}

fn canonical_order(a: &CanonicalFinding, b: &CanonicalFinding) -> Ordering {
    a.file
        .cmp(&b.file)
        .then(a.line.cmp(&b.line))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| a.sources.cmp(&b.sources))
        .then(a.merged_count.cmp(&b.merged_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::Finding;
    use crate::signals::Severity;

    fn finding(source: &str, file: &str, line: u32, description: &str) -> Finding {
        Finding::new(source, file, description).with_line(line)
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard_similarity("a b c", "a b c") - 1.0).abs() < f64::EPSILON);
        assert!((jaccard_similarity("a b", "b c") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", "a"), 0.0);
        // Case and punctuation do not matter
        assert!((jaccard_similarity("Unchecked unwrap!", "unchecked UNWRAP") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_specificity_prefers_identifiers() {
        let vague = "possible panic in handler code here";
        let concrete = "`parse_args` unwraps user input";
        assert!(specificity(concrete) > specificity(vague));
        assert!(looks_like_identifier("HashMap::get"));
        assert!(looks_like_identifier("config.toml"));
        assert!(looks_like_identifier("userId"));
        assert!(!looks_like_identifier("the"));
        assert!(!looks_like_identifier("end."));
    }

    #[test]
    fn test_merges_same_defect_from_different_scanners() {
        let dedup = FindingsDeduplicator::default();
        let merged = dedup.merge(vec![
            finding("security", "src/db.rs", 40, "SQL query built with string formatting")
                .with_severity(Severity::High),
            finding("correctness", "src/db.rs", 43, "SQL query built with format! in `load_user`"),
        ]);

        assert_eq!(merged.len(), 1);
        let c = &merged[0];
        assert_eq!(c.merged_count, 2);
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.sources, vec!["correctness".to_string(), "security".to_string()]);
        assert_eq!(c.description, "SQL query built with format! in `load_user`");
        assert_eq!(c.line, Some(43));
    }

    #[test]
    fn test_keeps_distinct_defects_apart() {
        let dedup = FindingsDeduplicator::default();
        let merged = dedup.merge(vec![
            // same wording, other file
            finding("a", "src/a.rs", 10, "missing error handling"),
            finding("b", "src/b.rs", 10, "missing error handling"),
            // same file, too far apart
            finding("c", "src/a.rs", 30, "missing error handling"),
            // same place, unrelated wording
            finding("d", "src/a.rs", 11, "loop allocates on every iteration"),
        ]);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_line_window_boundary() {
        let dedup = FindingsDeduplicator::new(5, 0.5);
        let five_apart = dedup.merge(vec![
            finding("a", "f.rs", 10, "unchecked index access"),
            finding("b", "f.rs", 15, "unchecked index access"),
        ]);
        assert_eq!(five_apart.len(), 1);

        let six_apart = dedup.merge(vec![
            finding("a", "f.rs", 10, "unchecked index access"),
            finding("b", "f.rs", 16, "unchecked index access"),
        ]);
        assert_eq!(six_apart.len(), 2);
    }

    #[test]
    fn test_lineless_findings_only_match_lineless() {
        let dedup = FindingsDeduplicator::default();
        let merged = dedup.merge(vec![
            Finding::new("a", "README.md", "outdated install section"),
            Finding::new("b", "README.md", "outdated install section"),
            finding("c", "README.md", 1, "outdated install section"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].line, None);
        assert_eq!(merged[0].merged_count, 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let dedup = FindingsDeduplicator::default();
        let raw = vec![
            finding("s1", "src/lib.rs", 1, "public function lacks docs"),
            finding("s2", "src/lib.rs", 3, "public function lacks docs comment"),
            finding("s3", "src/lib.rs", 8, "public function `run` lacks docs comment"),
            finding("s1", "src/main.rs", 20, "exit code ignored"),
            finding("s4", "src/main.rs", 22, "unwrap on user input"),
            Finding::new("s2", "Cargo.toml", "unused dependency"),
        ];

        let once = dedup.merge(raw);
        let twice = dedup.merge(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_is_order_independent_for_simple_input() {
        let dedup = FindingsDeduplicator::default();
        let a = finding("x", "f.rs", 5, "null pointer dereference");
        let b = finding("y", "f.rs", 6, "null pointer dereference risk");
        let forward = dedup.merge(vec![a.clone(), b.clone()]);
        let backward = dedup.merge(vec![b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_empty_input() {
        let merged = FindingsDeduplicator::default().merge(Vec::<Finding>::new());
        assert!(merged.is_empty());
    }
}
