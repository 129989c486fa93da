//! Points where progress is conditioned on something.
//!
//! - [`GateValidator`]: verbatim completion-marker check
//! - [`RetryController`]: bounded re-invocation until the gate passes
//! - [`ApprovalGate`]: explicit approve/reject/revise decision
//! - [`QualityGate`]: deterministic checks with bounded correction

mod approval;
mod quality;
mod retry;
mod validator;

pub use approval::{
    ApprovalContext, ApprovalGate, AutoApprove, Decision, DecisionRecord, DecisionSource,
    InteractivePrompt,
};
pub use quality::{CommandCheck, QualityCheck, QualityGate, QualityOutcome, Violation};
pub use retry::{RetryController, RetryOutcome};
pub use validator::GateValidator;

#[cfg(test)]
pub(crate) use approval::testing;
