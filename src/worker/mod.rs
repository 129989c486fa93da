//! Boundary to the opaque capabilities that perform phase work.
//!
//! Every component that needs a worker receives an `Arc<dyn WorkerClient>`.
//! The orchestrator assumes nothing about a worker beyond
//! `execute(task, scope) -> text` and the response grammar in
//! [`signals`](crate::signals).

mod command;
mod recording;
mod registry;

pub use command::CommandWorker;
pub use recording::RecordingWorker;
pub use registry::WorkerRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::WorkerError;

/// What part of the workspace a worker invocation is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Workspace root the worker runs in
    pub root: PathBuf,
    /// Files or areas to focus on (empty = whole workspace)
    #[serde(default)]
    pub focus: Vec<String>,
    /// Worker must not modify the workspace
    #[serde(default)]
    pub read_only: bool,
}

impl Scope {
    pub fn workspace(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            focus: Vec::new(),
            read_only: false,
        }
    }

    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::workspace(root)
        }
    }

    pub fn with_focus(mut self, focus: Vec<String>) -> Self {
        self.focus = focus;
        self
    }
}

/// A single call-and-wait exchange with an opaque worker.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Hand `task` to the worker and block until it returns its raw text.
    async fn execute(&self, task: &str, scope: &Scope) -> Result<String, WorkerError>;

    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;
}

/// Record of one completed exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInvocation {
    pub task: String,
    pub scope: Scope,
    pub raw_output: String,
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedWorker;
    use super::*;

    #[tokio::test]
    async fn test_scripted_worker_repeats_last_response() {
        let worker = ScriptedWorker::new("w", vec!["one", "two"]);
        let scope = Scope::workspace("/tmp");
        assert_eq!(worker.execute("t", &scope).await.unwrap(), "one");
        assert_eq!(worker.execute("t", &scope).await.unwrap(), "two");
        assert_eq!(worker.execute("t", &scope).await.unwrap(), "two");
        assert_eq!(worker.call_count(), 3);
    }

    #[test]
    fn test_read_only_scope() {
        let scope = Scope::read_only("/repo").with_focus(vec!["src/".into()]);
        assert!(scope.read_only);
        assert_eq!(scope.focus, vec!["src/".to_string()]);
    }
}
