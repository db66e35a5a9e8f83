use std::path::PathBuf;

use thiserror::Error;

/// Exit code reported when a command could not be started at all
pub const EXIT_LAUNCH_FAILURE: i32 = 127;
/// Exit code reported when a command exceeded its time budget
pub const EXIT_TIMEOUT: i32 = 124;

/// The main error type for runbook operations
#[derive(Debug, Error)]
pub enum RunbookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot build command for task '{task}': {message}")]
    CommandBuild { task: String, message: String },

    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("{}", unknown_task_message(.name, .required_by.as_deref()))]
    UnknownTask {
        name: String,
        required_by: Option<String>,
    },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Task '{task}' failed with exit code {exit_code}{}", stderr_suffix(.stderr))]
    Execution {
        task: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Task '{task}' could not start '{program}': {source}")]
    Launch {
        task: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task '{task}' timed out after {seconds}s")]
    Timeout { task: String, seconds: u64 },

    #[error("Task '{task}' failed on {}: {source}", .path.display())]
    Filesystem {
        task: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunbookError {
    pub fn command_build(task: &str, message: impl Into<String>) -> Self {
        Self::CommandBuild {
            task: task.to_string(),
            message: message.into(),
        }
    }

    /// Process exit code the CLI should report for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Execution { exit_code, .. } if *exit_code > 0 => *exit_code,
            Self::Launch { .. } => EXIT_LAUNCH_FAILURE,
            Self::Timeout { .. } => EXIT_TIMEOUT,
            _ => 1,
        }
    }

    /// Name of the task this error is attributed to, if any
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::CommandBuild { task, .. }
            | Self::Execution { task, .. }
            | Self::Launch { task, .. }
            | Self::Timeout { task, .. }
            | Self::Filesystem { task, .. } => Some(task),
            _ => None,
        }
    }
}

fn unknown_task_message(name: &str, required_by: Option<&str>) -> String {
    match required_by {
        Some(parent) => format!("Task '{}' (required by '{}') is not registered", name, parent),
        None => format!("Task '{}' not found", name),
    }
}

/// Lines of captured stderr repeated in the error message
const STDERR_TAIL_LINES: usize = 10;

fn stderr_suffix(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
    format!("\n{}", tail.join("\n"))
}

/// Result type alias for runbook operations
pub type RunbookResult<T> = Result<T, RunbookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_mirrors_exit_code() {
        let err = RunbookError::Execution {
            task: "start_docker".to_string(),
            exit_code: 3,
            stderr: "boom\n".to_string(),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.task(), Some("start_docker"));
        assert_eq!(
            err.to_string(),
            "Task 'start_docker' failed with exit code 3\nboom"
        );
    }

    #[test]
    fn test_non_command_errors_exit_with_one() {
        assert_eq!(RunbookError::Config("x".into()).exit_code(), 1);
        let unknown = RunbookError::UnknownTask {
            name: "nonexistent".into(),
            required_by: None,
        };
        assert_eq!(unknown.exit_code(), 1);
        assert_eq!(unknown.to_string(), "Task 'nonexistent' not found");

        let killed = RunbookError::Execution {
            task: "start_server".into(),
            exit_code: -1,
            stderr: String::new(),
        };
        assert_eq!(killed.exit_code(), 1);
    }

    #[test]
    fn test_execution_message_keeps_stderr_tail() {
        let stderr = (1..=15).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let err = RunbookError::Execution {
            task: "build_linux".into(),
            exit_code: 2,
            stderr,
        };
        let message = err.to_string();
        assert!(message.contains("line 15"));
        assert!(message.contains("line 6"));
        assert!(!message.contains("line 5\n"));
    }

    #[test]
    fn test_cycle_message_joins_path() {
        let err = RunbookError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }
}
