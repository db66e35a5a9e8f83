use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use colored::*;
use runbook_core::registry::TaskSummary;
use runbook_core::runbook::{Runbook, RunbookConfig};
use runbook_core::types::RunbookError;
use tracing_subscriber::EnvFilter;

mod commands;

/// Runbook - A build and deployment task orchestrator
#[derive(Parser)]
#[command(name = "runbook")]
#[command(about = "Run the build, test and deployment tasks of the chat server")]
#[command(version)]
struct Cli {
    /// Path to the workspace root (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Workspace file with setting overrides and extra tasks (defaults to runbook.yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dotenv file layered under the process environment (defaults to .env)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace); RUNBOOK_LOG wins when set
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available tasks
    List {
        /// Print the task list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the tasks and commands a run would execute, without running them
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
        /// Task to plan
        task: String,
        /// Arguments passed to the task
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run a task after its dependencies
    Run {
        /// Task to run
        task: String,
        /// Arguments passed to the task
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Show the task dependency graph
    Graph,
    /// `runbook <task> [args...]` is shorthand for `runbook run <task> [args...]`
    #[command(external_subcommand)]
    Task(Vec<String>),
}

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let cli = match Cli::try_parse_from(&argv) {
        Ok(cli) => cli,
        Err(err) if err.kind() == ErrorKind::DisplayHelp => help_with_tasks(err, argv).await.exit(),
        Err(err) => err.exit(),
    };
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            if let Some(hint) = failure_hint(&err) {
                eprintln!("{}", hint.dimmed());
            }
            ExitCode::from(exit_status(&err))
        }
    }
}

/// Workspace location read from an argument list that may not parse, e.g.
/// one that asks for help
fn workspace_config(argv: &[OsString]) -> RunbookConfig {
    let matches = Cli::command()
        .disable_help_flag(true)
        .disable_version_flag(true)
        .ignore_errors(true)
        .try_get_matches_from(argv);
    let matches = match matches {
        Ok(matches) => matches,
        Err(_) => return RunbookConfig::new("."),
    };
    let path = |id: &str| matches.try_get_one::<PathBuf>(id).ok().flatten().cloned();
    RunbookConfig {
        root: path("workspace").unwrap_or_else(|| PathBuf::from(".")),
        config_file: path("config"),
        env_file: path("env_file"),
    }
}

/// Re-render a help request with the workspace's tasks below the options.
/// Help for a workspace that does not open is shown without tasks.
async fn help_with_tasks(help: clap::Error, argv: Vec<OsString>) -> clap::Error {
    let tasks = match Runbook::open(workspace_config(&argv)).await {
        Ok(runbook) => runbook.list(),
        Err(_) => return help,
    };
    if tasks.is_empty() {
        return help;
    }
    Cli::command()
        .after_help(task_help(&tasks))
        .try_get_matches_from(argv)
        .err()
        .unwrap_or(help)
}

fn task_help(tasks: &[TaskSummary]) -> String {
    let width = tasks.iter().map(|task| task.name.len()).max().unwrap_or(0);
    let mut help = String::from("Tasks:");
    for task in tasks {
        help.push_str(&format!("\n  {:width$}  {}", task.name, task.description, width = width));
    }
    help
}

/// Points at the dry run of the task a failure is attributed to
fn failure_hint(err: &anyhow::Error) -> Option<String> {
    let task = err.downcast_ref::<RunbookError>()?.task()?;
    Some(format!("hint: `runbook plan {}` shows the commands this task runs", task))
}

async fn execute(cli: Cli) -> Result<()> {
    tracing::debug!(workspace = %cli.workspace.display(), "opening workspace");
    let runbook = Runbook::open(RunbookConfig {
        root: cli.workspace,
        config_file: cli.config,
        env_file: cli.env_file,
    })
    .await?;

    match cli.command.unwrap_or(Commands::List { json: false }) {
        Commands::List { json } => commands::list::execute(&runbook, json),
        Commands::Plan { json, task, args } => {
            commands::plan::execute(&runbook, &task, &args, json)
        }
        Commands::Run { task, args } => commands::run::execute(&runbook, &task, &args).await,
        Commands::Graph => commands::graph::execute(&runbook),
        Commands::Task(mut words) => {
            if words.is_empty() {
                return commands::list::execute(&runbook, false);
            }
            let task = words.remove(0);
            commands::run::execute(&runbook, &task, &words).await
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("RUNBOOK_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Mirror the failing command's exit code; anything that is not a runbook
/// error, or does not fit a process status, exits with 1
fn exit_status(err: &anyhow::Error) -> u8 {
    let code = err
        .downcast_ref::<RunbookError>()
        .map(RunbookError::exit_code)
        .unwrap_or(1);
    u8::try_from(code).ok().filter(|code| *code != 0).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_core::configs::workspace::WORKSPACE_FILE;

    #[test]
    fn test_shorthand_is_an_external_subcommand() {
        let cli = Cli::try_parse_from(["runbook", "build_docker_image", "v1.2"]).unwrap();
        match cli.command {
            Some(Commands::Task(words)) => assert_eq!(words, vec!["build_docker_image", "v1.2"]),
            _ => panic!("expected shorthand task"),
        }
    }

    #[test]
    fn test_run_keeps_hyphenated_task_arguments() {
        let argv = ["runbook", "-v", "run", "docker_webapp", "up", "-d"];
        let cli = Cli::try_parse_from(argv).unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Some(Commands::Run { task, args }) => {
                assert_eq!(task, "docker_webapp");
                assert_eq!(args, vec!["up", "-d"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_no_subcommand_lists() {
        let cli = Cli::try_parse_from(["runbook", "-w", "/srv/chat"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.workspace, PathBuf::from("/srv/chat"));
    }

    #[test]
    fn test_exit_status_mirrors_runbook_errors() {
        let failed = anyhow::Error::new(RunbookError::Execution {
            task: "start_docker".to_string(),
            exit_code: 2,
            stderr: String::new(),
        });
        assert_eq!(exit_status(&failed), 2);

        let timeout = anyhow::Error::new(RunbookError::Timeout {
            task: "test_folder".to_string(),
            seconds: 60,
        });
        assert_eq!(exit_status(&timeout), 124);

        let out_of_range = anyhow::Error::new(RunbookError::Execution {
            task: "x".to_string(),
            exit_code: 300,
            stderr: String::new(),
        });
        assert_eq!(exit_status(&out_of_range), 1);
        assert_eq!(exit_status(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_failure_hint_names_the_task() {
        let failed = anyhow::Error::new(RunbookError::Timeout {
            task: "test_folder".to_string(),
            seconds: 60,
        });
        let hint = failure_hint(&failed).unwrap();
        assert!(hint.contains("runbook plan test_folder"));

        let unattributed = anyhow::Error::new(RunbookError::Config("bad".to_string()));
        assert_eq!(failure_hint(&unattributed), None);
    }

    #[test]
    fn test_workspace_config_survives_help_flag() {
        let argv: Vec<OsString> = ["runbook", "-w", "/srv/chat", "--env-file", "ci.env", "--help"]
            .iter()
            .map(OsString::from)
            .collect();
        let config = workspace_config(&argv);
        assert_eq!(config.root, PathBuf::from("/srv/chat"));
        assert_eq!(config.env_file, Some(PathBuf::from("ci.env")));
        assert_eq!(config.config_file, None);
    }

    #[tokio::test]
    async fn test_help_lists_workspace_tasks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE),
            r#"
tasks:
  - name: smoke
    description: Poke the local server
    script: curl localhost
"#,
        )
        .unwrap();
        let argv: Vec<OsString> = vec![
            "runbook".into(),
            "-w".into(),
            dir.path().as_os_str().to_owned(),
            "--help".into(),
        ];

        let help = match Cli::try_parse_from(&argv) {
            Err(err) if err.kind() == ErrorKind::DisplayHelp => err,
            _ => panic!("expected a help request"),
        };
        let rendered = help_with_tasks(help, argv).await.render().to_string();

        assert!(rendered.contains("Tasks:"));
        assert!(rendered.contains("smoke"));
        assert!(rendered.contains("Poke the local server"));
        assert!(rendered.contains("build_linux"));
        assert!(rendered.contains("Build server binaries for linux/amd64"));
    }

    #[tokio::test]
    async fn test_help_without_workspace_keeps_clap_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        let argv: Vec<OsString> = vec![
            "runbook".into(),
            "-c".into(),
            missing.into_os_string(),
            "--help".into(),
        ];

        let help = Cli::try_parse_from(&argv).err().unwrap();
        let rendered = help_with_tasks(help, argv).await.render().to_string();

        assert!(rendered.contains("Usage:"));
        assert!(!rendered.contains("Tasks:"));
    }
}
