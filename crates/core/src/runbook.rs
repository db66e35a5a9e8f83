//! High-level runbook interface
//!
//! [`Runbook`] is what the CLI talks to. Opening one loads the workspace and
//! dotenv files, gathers the build facts of the checkout, resolves the
//! settings once and registers the built-in and file-defined tasks.
//!
//! ```rust,no_run
//! use runbook_core::runbook::{Runbook, RunbookConfig};
//!
//! # async fn example() -> runbook_core::types::RunbookResult<()> {
//! let runbook = Runbook::open(RunbookConfig::new(".")).await?;
//! for task in runbook.list() {
//!     println!("{}: {}", task.name, task.description);
//! }
//! runbook.run("build_linux", &[]).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::configs::env_file::{layered_environment, load_env_file, ENV_FILE};
use crate::configs::workspace::{load_workspace_config, WorkspaceConfig, WORKSPACE_FILE};
use crate::execution::process::{ProcessRunner, SystemRunner};
use crate::execution::runner::{ExecutionReport, TaskExecutor, TaskPlan};
use crate::recipes::register_builtin_tasks;
use crate::registry::{TaskDefinition, TaskRegistry, TaskSummary};
use crate::settings::{OptionCatalog, Settings, SettingsResolver};
use crate::types::{RunbookError, RunbookResult};

/// Where to find the workspace and its files
#[derive(Debug, Clone)]
pub struct RunbookConfig {
    pub root: PathBuf,
    /// Explicit workspace file; `<root>/runbook.yml` is used when present
    pub config_file: Option<PathBuf>,
    /// Explicit dotenv file; `<root>/.env` is used when present
    pub env_file: Option<PathBuf>,
}

impl RunbookConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config_file: None,
            env_file: None,
        }
    }
}

pub struct Runbook {
    root: PathBuf,
    config: WorkspaceConfig,
    settings: Settings,
    registry: TaskRegistry,
    /// `.env` entries the process environment does not already set
    exports: BTreeMap<String, String>,
}

impl Runbook {
    /// Open the workspace using the process environment
    pub async fn open(config: RunbookConfig) -> RunbookResult<Self> {
        let process = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        Self::open_with_environment(config, process).await
    }

    pub async fn open_with_environment(
        config: RunbookConfig,
        process: impl IntoIterator<Item = (String, String)>,
    ) -> RunbookResult<Self> {
        let root = config.root;

        let workspace_file = existing_file(&root, config.config_file, WORKSPACE_FILE)?;
        let workspace_config = match &workspace_file {
            Some(path) => load_workspace_config(path)?,
            None => WorkspaceConfig::default(),
        };

        let env_file = existing_file(&root, config.env_file, ENV_FILE)?;
        let dotenv = match &env_file {
            Some(path) => load_env_file(path)?,
            None => HashMap::new(),
        };
        let process: HashMap<String, String> = process.into_iter().collect();
        let exports: BTreeMap<String, String> = dotenv
            .iter()
            .filter(|(key, _)| !process.contains_key(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let environment = layered_environment(dotenv, process);

        tracing::debug!(
            root = %root.display(),
            workspace_file = ?workspace_file,
            env_file = ?env_file,
            exported = exports.len(),
            "opening runbook"
        );

        let mut catalog = OptionCatalog::standard();
        apply_build_facts(&mut catalog, &root).await?;
        let settings =
            SettingsResolver::new(catalog).resolve(&environment, &workspace_config.settings)?;

        let mut registry = TaskRegistry::new();
        register_builtin_tasks(&mut registry)?;
        for task in &workspace_config.tasks {
            registry.register(TaskDefinition::from_config(task.clone()))?;
        }
        for (task, dependency) in registry.dangling_dependencies() {
            tracing::warn!(
                task = %task,
                dependency = %dependency,
                "task depends on an unregistered task"
            );
        }

        Ok(Self {
            root,
            config: workspace_config,
            settings,
            registry,
            exports,
        })
    }

    /// Workspace name from `runbook.yml`, falling back to the root directory name
    pub fn name(&self) -> String {
        self.config
            .name
            .clone()
            .or_else(|| {
                self.root
                    .canonicalize()
                    .ok()?
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "runbook".to_string())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        self.registry.list()
    }

    /// Runner for this workspace; children also receive the `.env` entries
    pub fn system_runner(&self) -> SystemRunner {
        SystemRunner::new(&self.root).with_env(self.exports.clone())
    }

    /// Steps of every task in the chain of `task`, without running anything
    pub fn plan(&self, task: &str, args: &[String]) -> RunbookResult<Vec<TaskPlan>> {
        let chain = self.registry.resolve_chain(task)?;
        TaskExecutor::new(self.system_runner(), &self.root).plan(&chain, &self.settings, args)
    }

    pub async fn run(&self, task: &str, args: &[String]) -> RunbookResult<ExecutionReport> {
        let executor = TaskExecutor::new(self.system_runner(), &self.root);
        self.run_with(&executor, task, args).await
    }

    pub async fn run_with<R: ProcessRunner>(
        &self,
        executor: &TaskExecutor<R>,
        task: &str,
        args: &[String],
    ) -> RunbookResult<ExecutionReport> {
        let chain = self.registry.resolve_chain(task)?;
        tracing::info!(
            task = %task,
            chain = ?chain.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "resolved chain"
        );
        executor.run(&chain, &self.settings, args).await
    }
}

/// An explicit file must exist; the default one is optional
fn existing_file(
    root: &Path,
    explicit: Option<PathBuf>,
    default_name: &str,
) -> RunbookResult<Option<PathBuf>> {
    match explicit {
        Some(path) => {
            let path = if path.is_relative() { root.join(path) } else { path };
            if path.is_file() {
                Ok(Some(path))
            } else {
                Err(RunbookError::Config(format!("File not found: {}", path.display())))
            }
        }
        None => {
            let path = root.join(default_name);
            Ok(path.is_file().then_some(path))
        }
    }
}

/// Replace the defaults of derived facts: today's date and the checked out
/// revision. Either can still be overridden from the environment.
async fn apply_build_facts(catalog: &mut OptionCatalog, root: &Path) -> RunbookResult<()> {
    catalog.set_default("BUILD_DATE", chrono::Utc::now().format("%Y-%m-%d").to_string())?;
    if let Some(hash) = git_head(root).await {
        catalog.set_default("BUILD_HASH", hash)?;
    }
    Ok(())
}

async fn git_head(root: &Path) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        tracing::debug!(root = %root.display(), "not a git checkout, BUILD_HASH keeps its default");
        return None;
    }
    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!hash.is_empty()).then_some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::command::Step;
    use crate::execution::testing::RecordingRunner;
    use crate::settings::SettingValue;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_open_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let runbook = Runbook::open_with_environment(RunbookConfig::new(dir.path()), env(&[]))
            .await
            .unwrap();

        assert_eq!(runbook.settings().get("BUILD_NUMBER"), Some(&SettingValue::from("dev")));
        assert!(runbook.registry().contains("start_docker"));
        assert_eq!(runbook.list().len(), runbook.registry().len());
        let date = runbook.settings().text("BUILD_DATE").unwrap();
        assert_eq!(date.len(), 10);
    }

    #[tokio::test]
    async fn test_override_file_beats_env_file_and_process() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ENV_FILE),
            "BUILD_NUMBER=7\nDOCKER=podman\nGO=go1.22\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE),
            "name: chat\nsettings:\n  BUILD_NUMBER: \"99\"\n",
        )
        .unwrap();

        let runbook = Runbook::open_with_environment(
            RunbookConfig::new(dir.path()),
            env(&[("BUILD_NUMBER", "42"), ("DOCKER", "nerdctl")]),
        )
        .await
        .unwrap();

        assert_eq!(runbook.name(), "chat");
        assert_eq!(runbook.settings().text("BUILD_NUMBER").as_deref(), Some("99"));
        assert_eq!(runbook.settings().text("DOCKER").as_deref(), Some("nerdctl"));
        assert_eq!(runbook.settings().text("GO").as_deref(), Some("go1.22"));
    }

    #[tokio::test]
    async fn test_file_tasks_join_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE),
            r#"
tasks:
  - name: smoke
    description: Build then poke the server
    dependencies: [build_linux]
    command: ["curl", "-f", "${1}"]
"#,
        )
        .unwrap();
        let runbook = Runbook::open_with_environment(
            RunbookConfig::new(dir.path()),
            env(&[("GOPATH", "/home/dev/go")]),
        )
        .await
        .unwrap();

        let smoke = runbook.list().into_iter().find(|task| task.name == "smoke").unwrap();
        assert!(!smoke.builtin);
        assert_eq!(smoke.description, "Build then poke the server");
        assert!(runbook.list().iter().any(|task| task.name == "build_linux" && task.builtin));

        let plans = runbook.plan("smoke", &["http://localhost:8065".to_string()]).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].task, "build_linux");
        assert_eq!(plans[1].steps.len(), 1);
        match &plans[1].steps[0] {
            Step::Run(command) => {
                assert_eq!(command.program, "curl");
                assert_eq!(command.args, ["-f", "http://localhost:8065"]);
            }
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_file_task_cannot_shadow_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE),
            "tasks:\n  - name: build_linux\n    command: make\n",
        )
        .unwrap();

        let result = Runbook::open_with_environment(RunbookConfig::new(dir.path()), env(&[])).await;
        assert!(matches!(
            result,
            Err(RunbookError::DuplicateTask(ref name)) if name == "build_linux"
        ));
    }

    #[tokio::test]
    async fn test_unknown_override_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(WORKSPACE_FILE), "settings:\n  BULID_NUMBER: 1\n").unwrap();

        let result = Runbook::open_with_environment(RunbookConfig::new(dir.path()), env(&[])).await;
        assert!(matches!(
            result,
            Err(RunbookError::Config(ref message)) if message.contains("BULID_NUMBER")
        ));
    }

    #[tokio::test]
    async fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunbookConfig {
            env_file: Some(PathBuf::from("ci.env")),
            ..RunbookConfig::new(dir.path())
        };

        let result = Runbook::open_with_environment(config, env(&[])).await;
        assert!(matches!(
            result,
            Err(RunbookError::Config(ref message)) if message.contains("ci.env")
        ));
    }

    #[tokio::test]
    async fn test_unknown_task_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runbook = Runbook::open_with_environment(RunbookConfig::new(dir.path()), env(&[]))
            .await
            .unwrap();
        let executor = TaskExecutor::new(RecordingRunner::default(), dir.path()).quiet();

        let err = runbook
            .run_with(&executor, "nonexistent", &[])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunbookError::UnknownTask { ref name, required_by: None } if name == "nonexistent"
        ));
        assert_eq!(err.exit_code(), 1);
        assert!(executor.runner().seen().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_file_entries_reach_child_processes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ENV_FILE),
            "ONLY_IN_DOTENV=from-dotenv\nBUILD_NUMBER=77\nSHADOWED_BY_PROCESS=from-dotenv\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE),
            r#"
tasks:
  - name: show_env
    command:
      - sh
      - -c
      - printf '[%s][%s][%s]' "$ONLY_IN_DOTENV" "$BUILD_NUMBER" "$SHADOWED_BY_PROCESS"
"#,
        )
        .unwrap();
        let runbook = Runbook::open_with_environment(
            RunbookConfig::new(dir.path()),
            env(&[("SHADOWED_BY_PROCESS", "from-process")]),
        )
        .await
        .unwrap();
        assert_eq!(runbook.settings().text("BUILD_NUMBER").as_deref(), Some("77"));

        let executor = TaskExecutor::new(runbook.system_runner(), dir.path()).quiet();
        let report = runbook.run_with(&executor, "show_env", &[]).await.unwrap();

        // The process variable is inherited by the child, not re-exported
        assert_eq!(report.result.stdout, "[from-dotenv][77][]");
    }
}
