//! Turning a task into concrete steps
//!
//! [`build`] plans a task's steps from the resolved settings and the
//! positional arguments. Values are always placed into their own argv token;
//! the only strings assembled here are linker `-X` flags, which the Go
//! toolchain splits itself and which are quoted accordingly.

use std::path::{Path, PathBuf};

use crate::configs::tasks::{Command as TaskCommand, TaskConfig};
use crate::execution::command::{Command, Step};
use crate::registry::{TaskAction, TaskDefinition};
use crate::settings::Settings;
use crate::types::{RunbookError, RunbookResult};

/// Go symbols stamped at link time, in the order they are rendered
pub const LINKER_SYMBOLS: &[(&str, &str)] = &[
    ("model.BuildNumber", "BUILD_NUMBER"),
    ("model.BuildDate", "BUILD_DATE"),
    ("model.BuildHash", "BUILD_HASH"),
    ("model.BuildHashEnterprise", "BUILD_HASH_ENTERPRISE"),
    ("model.BuildEnterpriseReady", "BUILD_ENTERPRISE_READY"),
    ("app.NOTICES_JSON_URL", "NOTICES_JSON_URL"),
    ("app.NOTICES_JSON_FETCH_FREQUENCY_SECONDS", "NOTICES_FETCH_SECS"),
    ("app.NOTICES_SKIP_CACHE", "NOTICES_SKIP_CACHE"),
];

/// Plan the steps of `definition` for one run in the workspace at `root`
pub fn build(
    definition: &TaskDefinition,
    settings: &Settings,
    args: &[String],
    root: &Path,
) -> RunbookResult<Vec<Step>> {
    let ctx = BuildContext {
        task: &definition.name,
        settings,
        args,
        root,
    };
    match &definition.action {
        TaskAction::Builtin(recipe) => recipe(&ctx),
        TaskAction::File(config) => plan_file_task(config, &ctx),
    }
}

/// Everything a recipe may look at while planning
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub task: &'a str,
    pub settings: &'a Settings,
    pub args: &'a [String],
    pub root: &'a Path,
}

impl<'a> BuildContext<'a> {
    pub fn fail(&self, message: impl Into<String>) -> RunbookError {
        RunbookError::command_build(self.task, message)
    }

    /// Required positional argument (0-based)
    pub fn arg(&self, index: usize, name: &str) -> RunbookResult<&'a str> {
        self.args
            .get(index)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                self.fail(format!(
                    "missing required argument <{}> (position {})",
                    name,
                    index + 1
                ))
            })
    }

    pub fn optional_arg(&self, index: usize) -> Option<&'a str> {
        self.args
            .get(index)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Setting that must be present and non-empty
    pub fn setting(&self, name: &str) -> RunbookResult<String> {
        self.settings
            .text(name)
            .ok_or_else(|| self.fail(format!("setting {} is not set", name)))
    }

    /// Setting rendered as text; unset reads as empty
    pub fn setting_or_empty(&self, name: &str) -> String {
        self.settings.text(name).unwrap_or_default()
    }

    /// `path` made absolute against the workspace root
    pub fn absolute(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_relative() {
            self.root.join(path)
        } else {
            path.to_path_buf()
        }
    }

    pub fn go(&self) -> RunbookResult<String> {
        self.setting("GO")
    }

    /// GOFLAGS split into tokens with shell-word rules
    pub fn go_flags(&self) -> RunbookResult<Vec<String>> {
        let raw = self.setting_or_empty("GOFLAGS");
        shlex::split(&raw)
            .ok_or_else(|| self.fail(format!("GOFLAGS has unbalanced quotes: {}", raw)))
    }

    /// GOBIN, falling back to `$GOPATH/bin`
    pub fn gobin(&self) -> RunbookResult<PathBuf> {
        if let Some(gobin) = self.settings.text("GOBIN") {
            return Ok(PathBuf::from(gobin));
        }
        self.settings
            .text("GOPATH")
            .map(|gopath| PathBuf::from(gopath).join("bin"))
            .ok_or_else(|| self.fail("neither GOBIN nor GOPATH is set"))
    }

    /// The `-ldflags` value: user LDFLAGS followed by the stamped symbols
    pub fn ldflags(&self) -> RunbookResult<String> {
        let module = self.setting("GO_MODULE")?;
        let mut parts = Vec::with_capacity(LINKER_SYMBOLS.len() * 2 + 1);

        let extra = self.setting_or_empty("LDFLAGS");
        if !extra.trim().is_empty() {
            parts.push(extra.trim().to_string());
        }

        for (symbol, setting) in LINKER_SYMBOLS {
            let value = self.setting_or_empty(setting);
            let assignment = format!("{}/{}={}", module, symbol, value);
            parts.push("-X".to_string());
            parts.push(self.quote_linker_value(&assignment)?);
        }

        Ok(parts.join(" "))
    }

    /// Quote a value for the Go toolchain's flag splitter, which understands
    /// single and double quotes but no escapes
    fn quote_linker_value(&self, value: &str) -> RunbookResult<String> {
        if !value.contains('\'') {
            Ok(format!("'{}'", value))
        } else if !value.contains('"') {
            Ok(format!("\"{}\"", value))
        } else {
            Err(self.fail(format!(
                "linker value contains both quote characters: {}",
                value
            )))
        }
    }

    /// `go <subcommand> GOFLAGS... -ldflags LDFLAGS`
    pub fn go_with_ldflags(&self, subcommand: &str) -> RunbookResult<Command> {
        Ok(Command::new(self.go()?)
            .arg(subcommand)
            .args(self.go_flags()?)
            .arg("-ldflags")
            .arg(self.ldflags()?))
    }

    /// Expand `${NAME}` (setting), `${1}`.. (positional) and `$$` in one token
    pub fn expand(&self, token: &str) -> RunbookResult<String> {
        let mut out = String::with_capacity(token.len());
        let mut rest = token;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(stripped) = after.strip_prefix('$') {
                out.push('$');
                rest = stripped;
            } else if let Some(body) = after.strip_prefix('{') {
                let end = body
                    .find('}')
                    .ok_or_else(|| self.fail(format!("unterminated placeholder in '{}'", token)))?;
                out.push_str(&self.lookup(&body[..end])?);
                rest = &body[end + 1..];
            } else {
                out.push('$');
                rest = after;
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, name: &str) -> RunbookResult<String> {
        if let Ok(position) = name.parse::<usize>() {
            if position == 0 {
                return Err(self.fail("positional placeholders start at ${1}"));
            }
            return self
                .arg(position - 1, &format!("arg{}", position))
                .map(str::to_string);
        }
        self.settings
            .get(name)
            .map(|value| value.to_string())
            .ok_or_else(|| self.fail(format!("unknown or unset setting ${{{}}}", name)))
    }

    /// Expand a token list; a token that is exactly `${@}` becomes all
    /// positional arguments
    pub fn expand_all(&self, tokens: &[String]) -> RunbookResult<Vec<String>> {
        let mut expanded = Vec::with_capacity(tokens.len());
        for token in tokens {
            if token == "${@}" {
                expanded.extend(self.args.iter().cloned());
            } else {
                expanded.push(self.expand(token)?);
            }
        }
        Ok(expanded)
    }
}

fn plan_file_task(config: &TaskConfig, ctx: &BuildContext<'_>) -> RunbookResult<Vec<Step>> {
    let commands: Vec<Vec<String>> = if let Some(script) = &config.script {
        let mut tokens = vec![ctx.expand(script)?];
        tokens.extend(ctx.args.iter().cloned());
        vec![tokens]
    } else {
        let sources: Vec<&TaskCommand> = match (&config.command, &config.commands) {
            (Some(command), _) => vec![command],
            (None, Some(commands)) => commands.iter().collect(),
            (None, None) => {
                return Err(ctx.fail("task has no script or command to execute"));
            }
        };
        sources
            .into_iter()
            .map(|command| {
                let tokens = command
                    .tokens()
                    .ok_or_else(|| ctx.fail("command has unbalanced quotes"))?;
                ctx.expand_all(&tokens)
            })
            .collect::<RunbookResult<_>>()?
    };

    let mut steps = Vec::with_capacity(commands.len());
    for tokens in commands {
        let (program, args) = tokens
            .split_first()
            .ok_or_else(|| ctx.fail("command is empty"))?;
        let mut command = Command::new(program.clone()).args(args.iter().cloned());
        for (key, value) in config.env.iter().flatten() {
            command = command.env(key.clone(), ctx.expand(value)?);
        }
        if let Some(cwd) = &config.cwd {
            command = command.current_dir(ctx.expand(cwd)?);
        }
        steps.push(Step::Run(command));
    }
    Ok(steps)
}
