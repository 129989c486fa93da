use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{Scope, WorkerClient};
use crate::config::WorkerSpec;
use crate::errors::WorkerError;

/// Runs an external command per invocation.
///
/// The task is written to stdin; stdout is the raw response. Scope travels
/// as `PHASEGATE_SCOPE_*` environment variables and the working directory.
pub struct CommandWorker {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
}

impl CommandWorker {
    pub fn new(name: &str, command: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args,
            env: HashMap::new(),
            timeout,
        }
    }

    pub fn from_spec(name: &str, spec: &WorkerSpec) -> Self {
        Self {
            name: name.to_string(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            timeout: Duration::from_secs(spec.timeout_secs),
        }
    }

    async fn run(&self, task: &str, scope: &Scope) -> Result<String, WorkerError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .env("PHASEGATE_SCOPE_ROOT", &scope.root)
            .env("PHASEGATE_SCOPE_FOCUS", scope.focus.join(","))
            .env("PHASEGATE_READ_ONLY", if scope.read_only { "1" } else { "0" })
            .current_dir(&scope.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| WorkerError::SpawnFailed {
            worker: self.name.clone(),
            source,
        })?;

        let io_err = |source| WorkerError::Io {
            worker: self.name.clone(),
            source,
        };

        let stdin = child.stdin.take();
        let mut stdout = child.stdout.take().ok_or_else(|| {
            io_err(std::io::Error::other("worker stdout was not captured"))
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            io_err(std::io::Error::other("worker stderr was not captured"))
        })?;

        // Feed the task while draining output; either side may fill a pipe first.
        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(task.as_bytes()).await {
                    // A worker may exit without reading its task; that is its business.
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok::<(), std::io::Error>(())
        };

        let mut out = String::new();
        let mut err = String::new();
        let (in_res, out_res, err_res) = tokio::join!(
            feed,
            stdout.read_to_string(&mut out),
            stderr.read_to_string(&mut err)
        );
        in_res.map_err(io_err)?;
        out_res.map_err(io_err)?;
        err_res.map_err(io_err)?;

        let status = child.wait().await.map_err(io_err)?;
        if !status.success() {
            return Err(WorkerError::NonZeroExit {
                worker: self.name.clone(),
                exit_code: status.code().unwrap_or(-1),
                stderr: err.trim().to_string(),
            });
        }

        Ok(out)
    }
}

#[async_trait]
impl WorkerClient for CommandWorker {
    async fn execute(&self, task: &str, scope: &Scope) -> Result<String, WorkerError> {
        tracing::debug!(worker = %self.name, command = %self.command, "invoking worker");
        match tokio::time::timeout(self.timeout, self.run(task, scope)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout {
                worker: self.name.clone(),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(name: &str, script: &str, timeout: Duration) -> CommandWorker {
        CommandWorker::new(name, "sh", vec!["-c".into(), script.into()], timeout)
    }

    #[tokio::test]
    async fn test_task_is_piped_to_stdin() {
        let dir = tempdir().unwrap();
        let worker = sh("echo", "cat; echo DONE", Duration::from_secs(10));
        let out = worker
            .execute("hello worker\n", &Scope::workspace(dir.path()))
            .await
            .unwrap();
        assert!(out.contains("hello worker"));
        assert!(out.contains("DONE"));
    }

    #[tokio::test]
    async fn test_large_output_before_reading_task() {
        let dir = tempdir().unwrap();
        // Output and task each exceed a pipe buffer
        let worker = sh(
            "chatty",
            "head -c 300000 /dev/zero | tr '\\0' x; cat >/dev/null; echo; echo DONE",
            Duration::from_secs(20),
        );
        let task = "t".repeat(300_000);
        let out = worker
            .execute(&task, &Scope::workspace(dir.path()))
            .await
            .unwrap();
        assert!(out.starts_with("xxxx"));
        assert!(out.trim_end().ends_with("DONE"));
        assert!(out.len() > 300_000);
    }

    #[tokio::test]
    async fn test_scope_is_exported() {
        let dir = tempdir().unwrap();
        let worker = sh(
            "env",
            "cat >/dev/null; echo \"$PHASEGATE_READ_ONLY:$PHASEGATE_SCOPE_FOCUS\"",
            Duration::from_secs(10),
        );
        let scope = Scope::read_only(dir.path()).with_focus(vec!["a.rs".into(), "b.rs".into()]);
        let out = worker.execute("", &scope).await.unwrap();
        assert_eq!(out.trim(), "1:a.rs,b.rs");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let dir = tempdir().unwrap();
        let worker = sh("fail", "echo boom >&2; exit 3", Duration::from_secs(10));
        let err = worker
            .execute("", &Scope::workspace(dir.path()))
            .await
            .unwrap_err();
        match err {
            WorkerError::NonZeroExit {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("Expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempdir().unwrap();
        let worker = sh("slow", "sleep 5", Duration::from_millis(200));
        let err = worker
            .execute("", &Scope::workspace(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_spawn() {
        let dir = tempdir().unwrap();
        let worker = CommandWorker::new(
            "ghost",
            "phasegate-no-such-binary",
            vec![],
            Duration::from_secs(1),
        );
        let err = worker
            .execute("", &Scope::workspace(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::SpawnFailed { .. }));
    }
}
