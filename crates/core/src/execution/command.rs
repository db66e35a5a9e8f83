//! Structured commands and steps
//!
//! A task is planned into a list of [`Step`]s. External programs are described
//! by a [`Command`] holding discrete argv tokens; nothing is ever joined into a
//! shell line, so values containing spaces or quotes reach the program intact.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// A fully specified external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added to the inherited environment
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Data written to the child's stdin; the terminal is inherited otherwise
    #[serde(skip)]
    pub stdin: Option<String>,
    /// Captured stdout is written here instead of being echoed
    pub stdout_file: Option<PathBuf>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            stdin: None,
            stdout_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    /// All argv tokens including the program
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }
}

/// Renders the command as a copy-pasteable shell line, for display only
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.env {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", key, quote(value))?;
            first = false;
        }
        for token in self.argv() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(&quote(token))?;
            first = false;
        }
        if self.stdin.is_some() {
            f.write_str(" < (stdin)")?;
        }
        if let Some(path) = &self.stdout_file {
            write!(f, " > {}", quote(&path.display().to_string()))?;
        }
        Ok(())
    }
}

fn quote(token: &str) -> String {
    match shlex::try_quote(token) {
        Ok(quoted) => quoted.into_owned(),
        // Tokens with NUL bytes cannot be quoted; show them raw
        Err(_) => token.escape_debug().to_string(),
    }
}

/// Filesystem work done in-process rather than through `mkdir`/`cp`/`rm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FsOp {
    CreateDir { path: PathBuf },
    /// Removes a file or a directory tree; missing paths are fine
    Remove { path: PathBuf },
    /// Recursive copy; `exclude` globs match paths relative to `from`
    CopyTree {
        from: PathBuf,
        to: PathBuf,
        exclude: Vec<String>,
    },
    CopyFile { from: PathBuf, to: PathBuf },
}

impl fmt::Display for FsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsOp::CreateDir { path } => write!(f, "mkdir -p {}", path.display()),
            FsOp::Remove { path } => write!(f, "rm -rf {}", path.display()),
            FsOp::CopyTree { from, to, exclude } if exclude.is_empty() => {
                write!(f, "copy {} -> {}", from.display(), to.display())
            }
            FsOp::CopyTree { from, to, exclude } => write!(
                f,
                "copy {} -> {} (excluding {})",
                from.display(),
                to.display(),
                exclude.join(", ")
            ),
            FsOp::CopyFile { from, to } => write!(f, "copy {} -> {}", from.display(), to.display()),
        }
    }
}

/// One unit of work inside a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "step", rename_all = "snake_case")]
pub enum Step {
    Run(Command),
    Fs(FsOp),
    /// Message shown to the operator
    Notice(String),
}

impl Step {
    pub fn notice(message: impl Into<String>) -> Self {
        Step::Notice(message.into())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Run(command) => write!(f, "$ {}", command),
            Step::Fs(op) => write!(f, "# {}", op),
            Step::Notice(message) => write!(f, "> {}", message),
        }
    }
}

/// Outcome of one command, or of a whole chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_with_spaces_stay_single_tokens() {
        let command = Command::new("docker")
            .arg("build")
            .arg("-t")
            .arg("image:my tag")
            .arg("it's");
        assert_eq!(command.args, vec!["build", "-t", "image:my tag", "it's"]);
        assert_eq!(
            command.argv().collect::<Vec<_>>(),
            vec!["docker", "build", "-t", "image:my tag", "it's"]
        );
    }

    #[test]
    fn test_display_quotes_tokens() {
        let command = Command::new("go")
            .args(["run", "a b.go"])
            .env("GOOS", "linux")
            .stdout_to("out.yml");
        assert_eq!(command.to_string(), "GOOS=linux go run 'a b.go' > out.yml");
    }

    #[test]
    fn test_display_hides_stdin_data() {
        let command = Command::new("docker")
            .args(["login", "--password-stdin"])
            .stdin("hunter2");
        let shown = command.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(shown.ends_with("< (stdin)"));
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::notice("hello").to_string(), "> hello");
        let op = FsOp::CopyTree {
            from: "templates".into(),
            to: "dist/templates".into(),
            exclude: vec!["*.mjml".into()],
        };
        assert_eq!(
            Step::Fs(op).to_string(),
            "# copy templates -> dist/templates (excluding *.mjml)"
        );
    }

    #[test]
    fn test_plan_json_leaves_out_stdin() {
        let steps = vec![
            Step::Run(Command::new("docker").arg("login").stdin("hunter2")),
            Step::notice("logged in"),
        ];
        let json = serde_json::to_value(&steps).unwrap();

        assert_eq!(json[0]["kind"], "run");
        assert_eq!(json[0]["step"]["program"], "docker");
        assert!(json[0]["step"].get("stdin").is_none());
        assert_eq!(json[1]["step"], "logged in");
        assert!(!json.to_string().contains("hunter2"));
    }
}
