//! Scripted process runner shared by the executor and facade tests

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::execution::command::{Command, ExecutionResult};
use crate::execution::process::{ProcessError, ProcessRunner, RunOptions};

pub(crate) enum Scripted {
    Exit(i32),
    Launch,
    Timeout,
}

/// Records every command and answers from a script; unscripted commands
/// succeed
#[derive(Default)]
pub(crate) struct RecordingRunner {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<Command>>,
}

impl RecordingRunner {
    pub(crate) fn scripted(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::default(),
        }
    }

    pub(crate) fn seen(&self) -> Vec<Command> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(
        &self,
        command: &Command,
        _options: RunOptions,
    ) -> Result<ExecutionResult, ProcessError> {
        self.seen.lock().unwrap().push(command.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Scripted::Exit(0)) {
            Scripted::Exit(code) => Ok(ExecutionResult {
                exit_code: code,
                stdout: format!("ran {}\n", command.program),
                stderr: if code == 0 { String::new() } else { "boom\n".to_string() },
                duration: Duration::ZERO,
            }),
            Scripted::Launch => Err(ProcessError::Launch(io::Error::new(
                io::ErrorKind::NotFound,
                "not found",
            ))),
            Scripted::Timeout => Err(ProcessError::Timeout(Duration::from_secs(5))),
        }
    }
}
