//! The single bounded-retry primitive.
//!
//! Workers are treated as deterministic, so a failed gate is simply asked
//! again with the same task: no backoff, no jitter, no task escalation.

use std::future::Future;

use super::GateValidator;
use crate::errors::WorkerError;
use crate::worker::{Scope, WorkerClient};

/// Result of a bounded retry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Output passed the gate on attempt `attempts`.
    Passed { output: String, attempts: u32 },
    /// Every allowed attempt failed; the last raw output is kept for diagnostics.
    Exhausted { last_output: String, attempts: u32 },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Passed { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The passing output, or the last failing one.
    pub fn output(&self) -> &str {
        match self {
            Self::Passed { output, .. } => output,
            Self::Exhausted { last_output, .. } => last_output,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_retries: u32,
}

impl RetryController {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Invoke until `accept` passes, at most `max_retries + 1` times.
    ///
    /// `invoke` receives the 1-based attempt number. A transport error counts
    /// as a failed attempt whose diagnostic output is the error text.
    pub async fn run<F, Fut, A>(&self, mut invoke: F, accept: A) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<String, WorkerError>>,
        A: Fn(&str) -> bool,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut last_output = String::new();

        for attempt in 1..=max_attempts {
            match invoke(attempt).await {
                Ok(output) if accept(&output) => {
                    tracing::debug!(attempt, "gate passed");
                    return RetryOutcome::Passed { output, attempts: attempt };
                }
                Ok(output) => {
                    tracing::warn!(attempt, max_attempts, "gate failed: completion marker missing");
                    last_output = output;
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "worker invocation failed");
                    last_output = format!("[worker error] {e}");
                }
            }
        }

        RetryOutcome::Exhausted {
            last_output,
            attempts: max_attempts,
        }
    }

    /// Run `task` on `worker` until its output carries one of `markers`.
    pub async fn invoke(
        &self,
        worker: &dyn WorkerClient,
        task: &str,
        scope: &Scope,
        markers: &[&str],
    ) -> RetryOutcome {
        self.run(
            |_| worker.execute(task, scope),
            |output| GateValidator::check_any(output, markers),
        )
        .await
    }
}
