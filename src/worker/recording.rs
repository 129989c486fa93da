use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{Scope, WorkerClient};
use crate::errors::WorkerError;

/// Decorator that writes each task and raw output next to the run logs.
///
/// Files land in `log_dir` as `NNN-<worker>.task.md` and
/// `NNN-<worker>.output.log`, numbered in invocation order across all
/// recorded workers sharing the same counter.
pub struct RecordingWorker {
    inner: Arc<dyn WorkerClient>,
    log_dir: PathBuf,
    counter: Arc<AtomicU32>,
}

impl RecordingWorker {
    pub fn new(inner: Arc<dyn WorkerClient>, log_dir: PathBuf, counter: Arc<AtomicU32>) -> Self {
        Self {
            inner,
            log_dir,
            counter,
        }
    }

    fn write(&self, file_name: String, content: &str) {
        let path = self.log_dir.join(file_name);
        if let Err(e) = std::fs::create_dir_all(&self.log_dir)
            .and_then(|_| std::fs::write(&path, content))
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to record worker invocation");
        }
    }
}

#[async_trait]
impl WorkerClient for RecordingWorker {
    async fn execute(&self, task: &str, scope: &Scope) -> Result<String, WorkerError> {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let stem = format!("{:03}-{}", seq, self.inner.name());
        self.write(format!("{stem}.task.md"), task);

        let result = self.inner.execute(task, scope).await;
        match &result {
            Ok(output) => self.write(format!("{stem}.output.log"), output),
            Err(e) => self.write(format!("{stem}.output.log"), &format!("[worker error] {e}")),
        }
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::ScriptedWorker;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_records_task_and_output_in_order() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let counter = Arc::new(AtomicU32::new(0));
        let worker = RecordingWorker::new(
            Arc::new(ScriptedWorker::new("builder", vec!["first", "second"])),
            log_dir.clone(),
            counter,
        );
        let scope = Scope::workspace(dir.path());

        worker.execute("task one", &scope).await.unwrap();
        worker.execute("task two", &scope).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(log_dir.join("001-builder.task.md")).unwrap(),
            "task one"
        );
        assert_eq!(
            std::fs::read_to_string(log_dir.join("002-builder.output.log")).unwrap(),
            "second"
        );
        assert_eq!(worker.name(), "builder");
    }

    #[tokio::test]
    async fn test_records_worker_errors() {
        let dir = tempdir().unwrap();
        let worker = RecordingWorker::new(
            Arc::new(ScriptedWorker::with_results("w", vec![Err("kaput".into())])),
            dir.path().to_path_buf(),
            Arc::new(AtomicU32::new(0)),
        );
        let result = worker.execute("t", &Scope::workspace(dir.path())).await;
        assert!(result.is_err());
        let logged = std::fs::read_to_string(dir.path().join("001-w.output.log")).unwrap();
        assert!(logged.starts_with("[worker error]"));
        assert!(logged.contains("kaput"));
    }
}
