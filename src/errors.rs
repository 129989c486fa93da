//! Typed error hierarchy for phasegate.
//!
//! Four enums cover the subsystems:
//! - `WorkerError` — transport failures talking to an opaque worker
//! - `SnapshotError` — capture/restore failures of the workspace snapshot
//! - `ConfigError` — invalid pipeline definitions
//! - `PipelineError` — infrastructure failures that abort a run outright
//!
//! Bounded, recoverable failures (gate exhaustion, partial completion,
//! quality violations) are not errors here: they surface as a
//! [`HaltReason`](crate::orchestrator::HaltReason) on the run report.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from a single worker invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker '{worker}': {source}")]
    SpawnFailed {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker '{worker}' timed out after {secs}s")]
    Timeout { worker: String, secs: u64 },

    #[error("Worker '{worker}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        worker: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Worker '{worker}' I/O error: {source}")]
    Io {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown worker '{0}'")]
    UnknownWorker(String),
}

/// Errors from the snapshot substrate.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{path} is not a git repository: {source}")]
    NotARepository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("Snapshot {0} not found")]
    NotFound(String),

    #[error("No snapshot recorded for {0}")]
    NoSnapshot(PathBuf),

    #[error("Failed to read workspace file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

/// Errors from loading or validating a pipeline definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Pipeline defines no phases")]
    NoPhases,

    #[error("Phase name '{0}' is declared more than once")]
    DuplicatePhase(String),

    #[error("{context} references undefined worker '{worker}'")]
    UndefinedWorker { context: String, worker: String },

    #[error("{0} has an empty marker")]
    EmptyMarker(String),

    #[error("Phase '{0}' uses the same string for completion and more-work markers")]
    AmbiguousMarkers(String),

    #[error("{context} requires a [{section}] section")]
    MissingSection { context: String, section: String },

    #[error("{name} must be in (0, 1], got {value}")]
    ThresholdOutOfRange { name: String, value: f64 },

    #[error("convergence.max_iterations must be in 1..={max}, got {value}")]
    IterationCapOutOfRange { value: u32, max: u32 },
}

/// Errors that abort a pipeline run without a recoverable outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Snapshot capture failed, refusing to mutate the workspace: {0}")]
    SnapshotCapture(#[source] SnapshotError),

    #[error("Restore of snapshot {snapshot} failed; workspace left unresolved: {source}")]
    RestoreFailed {
        snapshot: String,
        #[source]
        source: SnapshotError,
    },

    #[error("Cannot resume: {0}")]
    NotResumable(String),

    #[error("Failed to persist run state at {path}: {source}")]
    StateWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
