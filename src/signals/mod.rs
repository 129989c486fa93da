//! Response grammar for worker output.
//!
//! Workers are opaque, so everything the orchestrator consumes from them
//! travels as plain text. Two things are extracted:
//!
//! - completion markers, checked verbatim by [`GateValidator`](crate::gates::GateValidator)
//! - `KEY: value` lines (`ISSUE`, `SCORE`, `FIX_APPLIED`, `REMAINING`, `LESSON`)
//!   parsed here into a [`WorkerResponse`]

mod parser;
mod types;

pub use parser::{parse_location, parse_response};
pub use types::{
    FixSignal, IssueSignal, LessonSignal, LessonTarget, Severity, WorkerResponse,
};
