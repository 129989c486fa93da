//! Independent review of the finished workspace.
//!
//! Review runs in three steps:
//!
//! 1. [`ScanCoordinator`] fans out every configured scanner concurrently over
//!    a read-only workspace and joins all of them.
//! 2. [`FindingsDeduplicator`] merges findings that describe the same defect
//!    into [`CanonicalFinding`]s.
//! 3. [`ReviewStage`] hands the full canonical list to one fix invocation.

pub mod dedup;
pub mod findings;
pub mod scanner;
pub mod stage;

pub use dedup::{FindingsDeduplicator, jaccard_similarity, word_set};
pub use findings::{CanonicalFinding, Finding, issue_lines};
pub use scanner::{ScanCoordinator, ScanReport, ScanResult, ScanUnavailable, Scanner};
pub use stage::{ReviewOutcome, ReviewStage};
