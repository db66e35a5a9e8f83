use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::configs::tasks::TaskConfig;
use crate::settings::SettingValue;
use crate::types::{RunbookError, RunbookResult};

/// Name of the workspace file looked up in the workspace root
pub const WORKSPACE_FILE: &str = "runbook.yml";

/// Contents of `runbook.yml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub name: Option<String>,
    /// Highest-priority setting values
    #[serde(default)]
    pub settings: BTreeMap<String, SettingValue>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

pub fn parse_workspace_config(yaml_str: &str) -> RunbookResult<WorkspaceConfig> {
    // An empty file is a valid, empty workspace config
    if yaml_str.trim().is_empty() {
        return Ok(WorkspaceConfig::default());
    }
    let config: WorkspaceConfig = serde_yaml::from_str(yaml_str)?;
    for task in &config.tasks {
        task.validate()?;
    }
    Ok(config)
}

pub fn load_workspace_config(path: &Path) -> RunbookResult<WorkspaceConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RunbookError::Config(format!(
            "Failed to read workspace config {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_workspace_config(&content).map_err(|e| {
        RunbookError::Config(format!(
            "Failed to parse workspace config {}: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings_and_tasks() {
        let config = parse_workspace_config(
            r#"
name: chat
settings:
  BUILD_NUMBER: 42
  IS_CI: true
  DOCKER_IMAGE: registry.local/chat
tasks:
  - name: vet
    description: Run go vet
    command: ["${GO}", "vet", "./..."]
    dependencies: [store_layers]
"#,
        )
        .unwrap();

        assert_eq!(config.name.as_deref(), Some("chat"));
        assert_eq!(config.settings["BUILD_NUMBER"], SettingValue::Integer(42));
        assert_eq!(config.settings["IS_CI"], SettingValue::Flag(true));
        assert_eq!(
            config.settings["DOCKER_IMAGE"],
            SettingValue::Text("registry.local/chat".to_string())
        );
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.tasks[0].dependencies(), vec!["store_layers"]);
    }

    #[test]
    fn test_empty_file_is_empty_config() {
        let config = parse_workspace_config("\n").unwrap();
        assert!(config.settings.is_empty());
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_load_reports_parse_failures_as_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WORKSPACE_FILE);
        std::fs::write(&path, "settings: [not, a, map]\n").unwrap();

        let err = load_workspace_config(&path).unwrap_err();
        assert!(matches!(err, RunbookError::Config(ref msg) if msg.contains("Failed to parse")));
    }

    #[test]
    fn test_load_reports_invalid_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WORKSPACE_FILE);
        std::fs::write(&path, "tasks:\n  - name: nothing\n").unwrap();

        assert!(load_workspace_config(&path).is_err());
    }
}
