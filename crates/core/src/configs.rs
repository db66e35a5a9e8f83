//! Configuration files read at startup
//!
//! - [`workspace`] - the `runbook.yml` workspace file (setting overrides and extra tasks)
//! - [`tasks`] - task definitions declared in the workspace file
//! - [`env_file`] - dotenv files layered under the process environment

pub mod env_file;
pub mod tasks;
pub mod workspace;
