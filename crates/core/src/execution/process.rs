//! Spawning external programs
//!
//! [`ProcessRunner`] is the seam between the executor and the operating
//! system. [`SystemRunner`] spawns real processes, echoing their output to the
//! terminal while capturing it; tests substitute a scripted runner.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::execution::command::{Command, ExecutionResult};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch: {0}")]
    Launch(#[source] io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to write {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while running: {0}")]
    Io(#[from] io::Error),
}

/// Per-invocation knobs for a runner
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    /// Mirror output to the terminal while capturing it
    pub echo: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            echo: true,
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the command to completion. A non-zero exit is a successful run
    /// with a non-zero `exit_code`; only launch, timeout and I/O problems are
    /// errors.
    async fn run(&self, command: &Command, options: RunOptions)
        -> Result<ExecutionResult, ProcessError>;
}

/// Runs commands as child processes of this one
#[derive(Debug, Clone)]
pub struct SystemRunner {
    root: PathBuf,
    base_env: BTreeMap<String, String>,
}

impl SystemRunner {
    /// Relative working directories and output files resolve against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_env: BTreeMap::new(),
        }
    }

    /// Variables exported to every child, below each command's own `env`
    pub fn with_env(mut self, base_env: BTreeMap<String, String>) -> Self {
        self.base_env = base_env;
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.root.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        command: &Command,
        options: RunOptions,
    ) -> Result<ExecutionResult, ProcessError> {
        let mut child_command = tokio::process::Command::new(&command.program);
        child_command
            .args(&command.args)
            .envs(&self.base_env)
            .envs(&command.env)
            .current_dir(self.resolve(command.cwd.as_deref().unwrap_or(Path::new(""))))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if command.stdin.is_some() {
            child_command.stdin(Stdio::piped());
        } else {
            child_command.stdin(Stdio::inherit());
        }

        tracing::debug!(command = %command, "spawning");
        let started = Instant::now();
        let mut child = child_command.spawn().map_err(ProcessError::Launch)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;

        // Redirected stdout is an artifact, not terminal output
        let echo_stdout = options.echo && command.stdout_file.is_none();
        let stdout_task = pump(stdout, echo_stdout.then(tokio::io::stdout));
        let stderr_task = pump(stderr, options.echo.then(tokio::io::stderr));

        if let (Some(data), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            stdin.write_all(data.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let status = match options.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        tracing::warn!(
                            command = %command,
                            seconds = limit.as_secs(),
                            "command timed out, killing it"
                        );
                        let _ = child.kill().await;
                        stdout_task.abort();
                        stderr_task.abort();
                        return Err(ProcessError::Timeout(limit));
                    }
                }
            }
            None => child.wait().await?,
        };

        let stdout = collect(stdout_task).await?;
        let stderr = collect(stderr_task).await?;

        if let Some(path) = &command.stdout_file {
            let path = self.resolve(path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ProcessError::Output {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(&path, &stdout)
                .await
                .map_err(|source| ProcessError::Output { path, source })?;
        }

        Ok(ExecutionResult {
            // Killed by a signal when there is no code
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration: started.elapsed(),
        })
    }
}

/// Drain a pipe into memory, optionally mirroring each chunk to `echo`
fn pump<R, W>(mut reader: R, mut echo: Option<W>) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            captured.extend_from_slice(&buf[..n]);
            if let Some(out) = echo.as_mut() {
                out.write_all(&buf[..n]).await?;
                out.flush().await?;
            }
        }
        Ok(captured)
    })
}

async fn collect(task: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    task.await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
