use std::collections::HashMap;
use std::path::Path;

use crate::types::{RunbookError, RunbookResult};

/// Name of the dotenv file looked up in the workspace root
pub const ENV_FILE: &str = ".env";

/// Read `KEY=value` pairs from a dotenv file without touching the process
/// environment
pub fn load_env_file(path: &Path) -> RunbookResult<HashMap<String, String>> {
    let entries = dotenvy::from_path_iter(path).map_err(|e| {
        RunbookError::Config(format!("Failed to read env file {}: {}", path.display(), e))
    })?;

    let mut vars = HashMap::new();
    for entry in entries {
        let (key, value) = entry.map_err(|e| {
            RunbookError::Config(format!("Failed to parse env file {}: {}", path.display(), e))
        })?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Layer the process environment over dotenv entries; variables already set
/// in the process win, as with dotenv itself
pub fn layered_environment(
    env_file: HashMap<String, String>,
    process: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    let mut environment = env_file;
    environment.extend(process);
    environment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE);
        std::fs::write(
            &path,
            "# registry credentials\nDOCKER_USERNAME=ci-bot\nDOCKER_PASSWORD=\"p@ss word\"\n",
        )
        .unwrap();

        let vars = load_env_file(&path).unwrap();
        assert_eq!(vars["DOCKER_USERNAME"], "ci-bot");
        assert_eq!(vars["DOCKER_PASSWORD"], "p@ss word");
    }

    #[test]
    fn test_missing_env_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_env_file(&dir.path().join("missing.env")).unwrap_err();
        assert!(matches!(err, RunbookError::Config(_)));
    }

    #[test]
    fn test_process_environment_wins() {
        let file = HashMap::from([
            ("BUILD_NUMBER".to_string(), "1".to_string()),
            ("GO".to_string(), "go1.22".to_string()),
        ]);
        let merged = layered_environment(file, vec![("BUILD_NUMBER".to_string(), "2".to_string())]);
        assert_eq!(merged["BUILD_NUMBER"], "2");
        assert_eq!(merged["GO"], "go1.22");
    }
}
