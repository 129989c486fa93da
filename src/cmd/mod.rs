//! CLI command implementations.
//!
//! | Module    | Commands handled    |
//! |-----------|---------------------|
//! | `run`     | `Run`               |
//! | `inspect` | `Status`, `Lessons` |

pub mod inspect;
pub mod run;

pub use inspect::{cmd_lessons, cmd_status};
pub use run::{RunOptions, cmd_run};
