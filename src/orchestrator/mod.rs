pub mod phase_runner;
pub mod pipeline;
pub mod state;

pub use phase_runner::{MAX_LOOP_ITERATIONS, PhaseResult, PhaseRunner};
pub use pipeline::{PipelineOrchestrator, RunReport};
pub use state::{HaltReason, PipelineRun, RunStatus, StateEntry, StateManager};
