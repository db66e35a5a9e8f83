use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{RunbookError, RunbookResult};

/// A command either as one string split into shell words, or as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Single(String),
    Multiple(Vec<String>),
}

impl Command {
    /// Argv tokens before template expansion. No shell is involved: quoting in
    /// the single-string form only groups words.
    pub fn tokens(&self) -> Option<Vec<String>> {
        match self {
            Command::Single(line) => shlex::split(line),
            Command::Multiple(tokens) => Some(tokens.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskConfig {
    pub name: String,
    pub description: Option<String>,
    pub script: Option<String>,
    /// One command, or several run in order
    pub command: Option<Command>,
    pub commands: Option<Vec<Command>>,
    pub dependencies: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
    pub cwd: Option<String>,
}

impl TaskConfig {
    pub fn validate(&self) -> RunbookResult<()> {
        if self.name.trim().is_empty() {
            return Err(RunbookError::Config(
                "Task names in the workspace file must not be empty".to_string(),
            ));
        }
        let sources = [
            self.script.is_some(),
            self.command.is_some(),
            self.commands.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();
        if sources != 1 {
            return Err(RunbookError::Config(format!(
                "Task '{}' must define exactly one of script, command or commands",
                self.name
            )));
        }
        Ok(())
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone().unwrap_or_default()
    }
}
