//! Sequential task executor
//!
//! Runs a resolved chain one task at a time. Each task is planned right
//! before it starts, so a task that fails to build never delays the error of
//! an earlier one, and nothing after the first failure is planned or spawned.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use colored::*;

use crate::builder;
use crate::execution::command::{ExecutionResult, Step};
use crate::execution::fs_ops;
use crate::execution::process::{ProcessError, ProcessRunner, RunOptions};
use crate::registry::TaskDefinition;
use crate::settings::Settings;
use crate::types::{RunbookError, RunbookResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Outcome of a chain that ran to completion
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Combined result: last exit code, concatenated output, total duration
    pub result: ExecutionResult,
    pub tasks: Vec<(String, TaskState)>,
}

/// The planned steps of one task, for dry runs
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskPlan {
    pub task: String,
    pub steps: Vec<Step>,
}

pub struct TaskExecutor<R: ProcessRunner> {
    runner: R,
    root: PathBuf,
    echo: bool,
}

impl<R: ProcessRunner> TaskExecutor<R> {
    pub fn new(runner: R, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            root: root.into(),
            echo: true,
        }
    }

    /// Suppress the progress headers and command output mirroring
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Plan every task of `chain` without running anything
    pub fn plan(
        &self,
        chain: &[&TaskDefinition],
        settings: &Settings,
        args: &[String],
    ) -> RunbookResult<Vec<TaskPlan>> {
        chain
            .iter()
            .enumerate()
            .map(|(index, task)| {
                let task_args = args_for(chain, index, args);
                Ok(TaskPlan {
                    task: task.name.clone(),
                    steps: builder::build(task, settings, task_args, &self.root)?,
                })
            })
            .collect()
    }

    /// Run `chain` in order, stopping at the first failure. Positional
    /// arguments go to the last task only.
    pub async fn run(
        &self,
        chain: &[&TaskDefinition],
        settings: &Settings,
        args: &[String],
    ) -> RunbookResult<ExecutionReport> {
        let options = RunOptions {
            timeout: command_timeout(settings),
            echo: self.echo,
        };
        let started = Instant::now();
        let mut states: Vec<(String, TaskState)> = chain
            .iter()
            .map(|task| (task.name.clone(), TaskState::Pending))
            .collect();
        let mut combined = ExecutionResult::default();

        for (index, task) in chain.iter().enumerate() {
            states[index].1 = TaskState::Running;
            match self.run_task(task, settings, args_for(chain, index, args), options).await {
                Ok(result) => {
                    states[index].1 = TaskState::Succeeded;
                    combined.exit_code = result.exit_code;
                    combined.stdout.push_str(&result.stdout);
                    combined.stderr.push_str(&result.stderr);
                }
                Err(err) => {
                    states[index].1 = TaskState::Failed;
                    let skipped: Vec<&str> = states[index + 1..]
                        .iter()
                        .map(|(name, _)| name.as_str())
                        .collect();
                    tracing::error!(
                        task = %task.name,
                        skipped = ?skipped,
                        error = %err,
                        "task failed, abandoning chain"
                    );
                    return Err(err);
                }
            }
        }

        combined.duration = started.elapsed();
        Ok(ExecutionReport {
            result: combined,
            tasks: states,
        })
    }

    async fn run_task(
        &self,
        task: &TaskDefinition,
        settings: &Settings,
        args: &[String],
        options: RunOptions,
    ) -> RunbookResult<ExecutionResult> {
        let steps = builder::build(task, settings, args, &self.root)?;

        if self.echo {
            println!();
            println!("┌─ {}", format!("Running task '{}'", task.name).bold());
            if !task.description.is_empty() {
                println!("└─ {}", task.description.bright_black());
            }
        }
        tracing::info!(task = %task.name, steps = steps.len(), "starting task");

        let started = Instant::now();
        let mut outcome = ExecutionResult::default();
        for step in &steps {
            match step {
                Step::Notice(message) => {
                    if self.echo {
                        println!("{}", message.cyan());
                    }
                }
                Step::Fs(op) => {
                    tracing::debug!(task = %task.name, op = %op, "filesystem step");
                    fs_ops::apply(op, &self.root).map_err(|(path, source)| {
                        RunbookError::Filesystem {
                            task: task.name.clone(),
                            path,
                            source,
                        }
                    })?;
                }
                Step::Run(command) => {
                    if self.echo {
                        println!("{} {}", "$".bright_black(), command);
                    }
                    let result = self
                        .runner
                        .run(command, options)
                        .await
                        .map_err(|err| process_failure(&task.name, &command.program, err))?;
                    outcome.stdout.push_str(&result.stdout);
                    outcome.stderr.push_str(&result.stderr);
                    if !result.success() {
                        return Err(RunbookError::Execution {
                            task: task.name.clone(),
                            exit_code: result.exit_code,
                            stderr: result.stderr,
                        });
                    }
                }
            }
        }

        outcome.duration = started.elapsed();
        tracing::info!(
            task = %task.name,
            elapsed_ms = outcome.duration.as_millis() as u64,
            "task succeeded"
        );
        if self.echo {
            println!(
                "{} {}",
                "✓".green(),
                format!("{} ({:.1}s)", task.name, outcome.duration.as_secs_f64()).bright_black()
            );
        }
        Ok(outcome)
    }
}

fn args_for<'a>(chain: &[&TaskDefinition], index: usize, args: &'a [String]) -> &'a [String] {
    if index + 1 == chain.len() {
        args
    } else {
        &[]
    }
}

fn command_timeout(settings: &Settings) -> Option<Duration> {
    settings
        .integer("COMMAND_TIMEOUT_SECS")
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs as u64))
}

fn process_failure(task: &str, program: &str, err: ProcessError) -> RunbookError {
    match err {
        ProcessError::Launch(source) => RunbookError::Launch {
            task: task.to_string(),
            program: program.to_string(),
            source,
        },
        ProcessError::Timeout(limit) => RunbookError::Timeout {
            task: task.to_string(),
            seconds: limit.as_secs(),
        },
        ProcessError::Output { path, source } => RunbookError::Filesystem {
            task: task.to_string(),
            path,
            source,
        },
        ProcessError::Io(source) => RunbookError::Io(source),
    }
}
