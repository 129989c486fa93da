pub mod config;
pub mod convergence;
pub mod errors;
pub mod gates;
pub mod lessons;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod review;
pub mod signals;
pub mod tracker;
pub mod ui;
pub mod worker;
pub mod workspace;
