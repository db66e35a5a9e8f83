//! Runbook Core Library
//!
//! This is the core library for the runbook build orchestrator. It provides
//! all the business logic for resolving settings, planning commands, ordering
//! tasks and running them.
//!
//! ## Architecture
//!
//! The core library is organized into several modules:
//!
//! - [`runbook`] - High-level interface used by the CLI
//! - [`settings`] - Option catalog and layered settings resolution
//! - [`configs`] - Parsing of `runbook.yml` and `.env`
//! - [`builder`] - Turning a task into structured commands
//! - [`recipes`] - The built-in tasks
//! - [`registry`] - Task names, dependency graph and chain resolution
//! - [`execution`] - Process runner and the sequential executor
//! - [`platform`] - Cross-compilation targets
//! - [`types`] - Common error types and type aliases
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runbook_core::runbook::{Runbook, RunbookConfig};
//!
//! # async fn example() -> runbook_core::types::RunbookResult<()> {
//! let runbook = Runbook::open(RunbookConfig::new(".")).await?;
//! let report = runbook.run("test_data", &[]).await?;
//! assert!(report.result.success());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod configs;
pub mod execution;
pub mod platform;
pub mod recipes;
pub mod registry;
pub mod runbook;
pub mod settings;
pub mod types;

pub use runbook::{Runbook, RunbookConfig};
pub use types::{RunbookError, RunbookResult};
