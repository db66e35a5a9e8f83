//! Task execution
//!
//! Structured commands and steps, the in-process filesystem operations, the
//! process runner seam and the sequential executor built on top of them.

pub mod command;
pub mod fs_ops;
pub mod process;
pub mod runner;
#[cfg(test)]
pub(crate) mod testing;

pub use command::{Command, ExecutionResult, FsOp, Step};
pub use process::{ProcessError, ProcessRunner, RunOptions, SystemRunner};
pub use runner::{ExecutionReport, TaskExecutor, TaskPlan, TaskState};
