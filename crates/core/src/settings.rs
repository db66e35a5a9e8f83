//! Layered settings resolution
//!
//! Every option runbook understands is declared once in an [`OptionCatalog`]
//! with its kind, default and validator. [`SettingsResolver::resolve`] folds the
//! layers together (override file > environment > defaults) into an immutable
//! [`Settings`] value that is then passed explicitly to every component.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{RunbookError, RunbookResult};

/// A resolved setting value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Text(String),
    Integer(i64),
    Flag(bool),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Text(value) => f.write_str(value),
            SettingValue::Integer(value) => write!(f, "{}", value),
            SettingValue::Flag(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Integer(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Flag(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Text,
    Integer,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    Any,
    NonEmpty,
    /// TCP port, 1..=65535
    Port,
    Positive,
    /// Zero or more
    NonNegative,
    /// http(s) URL with a host
    Url,
}

impl Validator {
    fn check(self, value: &SettingValue) -> Result<(), String> {
        match (self, value) {
            (Validator::Any, _) => Ok(()),
            (Validator::NonEmpty, SettingValue::Text(text)) if text.trim().is_empty() => {
                Err("must not be empty".to_string())
            }
            (Validator::Port, SettingValue::Integer(port)) if !(1..=65535).contains(port) => {
                Err(format!("{} is not a valid port (1-65535)", port))
            }
            (Validator::Positive, SettingValue::Integer(n)) if *n <= 0 => {
                Err(format!("{} must be greater than zero", n))
            }
            (Validator::NonNegative, SettingValue::Integer(n)) if *n < 0 => {
                Err(format!("{} must not be negative", n))
            }
            (Validator::Url, SettingValue::Text(url)) => check_url(url),
            _ => Ok(()),
        }
    }
}

fn check_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| format!("'{}' must start with http:// or https://", url))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(format!("'{}' has no host", url));
    }
    Ok(())
}

/// Declaration of a single recognised option
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: SettingKind,
    pub default: Option<SettingValue>,
    pub required: bool,
    pub validator: Validator,
    pub description: &'static str,
}

impl OptionSpec {
    pub fn text(name: &'static str, default: &str, description: &'static str) -> Self {
        Self {
            name,
            kind: SettingKind::Text,
            default: Some(SettingValue::from(default)),
            required: false,
            validator: Validator::Any,
            description,
        }
    }

    pub fn integer(name: &'static str, default: i64, description: &'static str) -> Self {
        Self {
            name,
            kind: SettingKind::Integer,
            default: Some(SettingValue::Integer(default)),
            required: false,
            validator: Validator::Any,
            description,
        }
    }

    pub fn flag(name: &'static str, default: bool, description: &'static str) -> Self {
        Self {
            name,
            kind: SettingKind::Flag,
            default: Some(SettingValue::Flag(default)),
            required: false,
            validator: Validator::Any,
            description,
        }
    }

    /// Text option with no default; it stays unset unless a layer provides it
    pub fn optional(name: &'static str, description: &'static str) -> Self {
        Self {
            default: None,
            ..Self::text(name, "", description)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    fn parse(&self, raw: &str) -> RunbookResult<SettingValue> {
        let value = match self.kind {
            SettingKind::Text => SettingValue::Text(raw.to_string()),
            SettingKind::Integer => {
                let n = raw.trim().parse::<i64>().map_err(|_| {
                    RunbookError::Config(format!("{} expects an integer, got '{}'", self.name, raw))
                })?;
                SettingValue::Integer(n)
            }
            SettingKind::Flag => SettingValue::Flag(parse_flag(raw).ok_or_else(|| {
                RunbookError::Config(format!("{} expects true/false, got '{}'", self.name, raw))
            })?),
        };
        self.check(value)
    }

    fn coerce(&self, value: &SettingValue) -> RunbookResult<SettingValue> {
        match (self.kind, value) {
            (SettingKind::Text, SettingValue::Text(_))
            | (SettingKind::Integer, SettingValue::Integer(_))
            | (SettingKind::Flag, SettingValue::Flag(_)) => self.check(value.clone()),
            // Override files may spell numbers and booleans as strings, or vice versa
            _ => self.parse(&value.to_string()),
        }
    }

    fn check(&self, value: SettingValue) -> RunbookResult<SettingValue> {
        self.validator
            .check(&value)
            .map_err(|reason| RunbookError::Config(format!("{}: {}", self.name, reason)))?;
        Ok(value)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// The set of options recognised for one invocation, in declaration order
#[derive(Debug, Clone, Default)]
pub struct OptionCatalog {
    options: IndexMap<&'static str, OptionSpec>,
}

impl OptionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, spec: OptionSpec) -> &mut Self {
        self.options.insert(spec.name, spec);
        self
    }

    /// Replace the default of a declared option, e.g. with a derived build fact
    pub fn set_default(&mut self, name: &str, value: impl Into<SettingValue>) -> RunbookResult<()> {
        let spec = self
            .options
            .get_mut(name)
            .ok_or_else(|| RunbookError::Config(format!("Unknown option '{}'", name)))?;
        spec.default = Some(value.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.options.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionSpec> {
        self.options.values()
    }

    /// The options used by the built-in tasks
    pub fn standard() -> Self {
        let specs = [
            OptionSpec::flag(
                "IS_CI",
                false,
                "Running on a CI host; dependency services are provided externally",
            ),
            OptionSpec::flag("NO_DOCKER", false, "Never start docker dependency services"),
            OptionSpec::text("BUILD_NUMBER", "dev", "Build number stamped into the server binary")
                .validate(Validator::NonEmpty),
            OptionSpec::text("BUILD_DATE", "unknown", "Build date stamped into the server binary"),
            OptionSpec::text(
                "BUILD_HASH",
                "none",
                "Source revision stamped into the server binary",
            ),
            OptionSpec::text("BUILD_HASH_ENTERPRISE", "none", "Enterprise source revision"),
            OptionSpec::flag(
                "BUILD_ENTERPRISE_READY",
                false,
                "Build with enterprise features enabled",
            ),
            OptionSpec::text(
                "NOTICES_JSON_URL",
                "https://notices.example.com/notices",
                "Location of in-product notices",
            )
            .validate(Validator::Url),
            OptionSpec::integer("NOTICES_FETCH_SECS", 3600, "Notices polling interval in seconds")
                .validate(Validator::Positive),
            OptionSpec::flag("NOTICES_SKIP_CACHE", false, "Bypass the notices cache"),
            OptionSpec::text("GO", "go", "Go toolchain binary").validate(Validator::NonEmpty),
            OptionSpec::text("GOFLAGS", "", "Extra flags passed to go run/build/generate"),
            OptionSpec::text("GOPATH", "", "Go workspace path"),
            OptionSpec::text(
                "GOBIN",
                "",
                "Directory for go-installed tools; defaults to $GOPATH/bin",
            ),
            OptionSpec::text("LDFLAGS", "", "Extra linker flags placed before the stamped symbols"),
            OptionSpec::text(
                "GO_MODULE",
                "example.com/chat/server/v5",
                "Go module path of the server",
            )
            .validate(Validator::NonEmpty),
            OptionSpec::text("SERVER_MAIN", "./cmd/server/main.go", "Entry point of the server")
                .validate(Validator::NonEmpty),
            OptionSpec::text("SERVER_BINARY", "server", "Name of the server binary")
                .validate(Validator::NonEmpty),
            OptionSpec::text(
                "ENABLED_DOCKER_SERVICES",
                "mysql postgres inbucket minio",
                "Dependency services started by start_docker",
            ),
            OptionSpec::text("DOCKER", "docker", "Container engine binary")
                .validate(Validator::NonEmpty),
            OptionSpec::text("DOCKER_COMPOSE", "docker-compose", "Compose binary")
                .validate(Validator::NonEmpty),
            OptionSpec::text("DOCKER_IMAGE", "example/chat-server", "Server image repository")
                .validate(Validator::NonEmpty),
            OptionSpec::text("NGINX_DATA_IMAGE", "example/nginxdata", "Nginx data image repository")
                .validate(Validator::NonEmpty),
            OptionSpec::text(
                "APP_DATA_IMAGE",
                "example/appdata",
                "Application data image repository",
            )
            .validate(Validator::NonEmpty),
            OptionSpec::optional("DOCKER_USERNAME", "Registry user for push_docker_image"),
            OptionSpec::optional("DOCKER_PASSWORD", "Registry password for push_docker_image"),
            OptionSpec::text("DIST_ROOT", "dist", "Distribution output directory")
                .validate(Validator::NonEmpty),
            OptionSpec::integer("SAMPLEDATA_WORKERS", 4, "Workers used by test_data")
                .validate(Validator::Positive),
            OptionSpec::integer("SAMPLEDATA_USERS", 60, "Users created by test_data")
                .validate(Validator::Positive),
            OptionSpec::integer(
                "CERT_HTTP_PORT",
                80,
                "Host port bound by the certificate container",
            )
            .validate(Validator::Port),
            OptionSpec::integer("COMMAND_TIMEOUT_SECS", 0, "Per-command timeout, 0 disables it")
                .validate(Validator::NonNegative),
        ];

        let mut catalog = Self::new();
        for spec in specs {
            catalog.declare(spec);
        }
        catalog
    }
}

/// Immutable, resolved configuration for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.values.get(name)
    }

    /// Text form of a setting; unset and empty values are `None`
    pub fn text(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .map(|value| value.to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(SettingValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(SettingValue::Flag(true)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

#[cfg(test)]
impl Settings {
    pub(crate) fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, SettingValue)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

/// Folds defaults, environment and override entries into [`Settings`]
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    catalog: OptionCatalog,
}

impl SettingsResolver {
    pub fn new(catalog: OptionCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve every declared option; override entries win over the
    /// environment, which wins over defaults
    pub fn resolve(
        &self,
        environment: &HashMap<String, String>,
        overrides: &BTreeMap<String, SettingValue>,
    ) -> RunbookResult<Settings> {
        let mut unknown: Vec<&String> = overrides
            .keys()
            .filter(|key| self.catalog.get(key.as_str()).is_none())
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            let names = unknown
                .into_iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(RunbookError::Config(format!(
                "Unknown option(s) in override file: {}",
                names
            )));
        }

        let mut values = BTreeMap::new();
        for spec in self.catalog.iter() {
            let resolved = if let Some(value) = overrides.get(spec.name) {
                Some(spec.coerce(value)?)
            } else if let Some(raw) = environment.get(spec.name) {
                Some(spec.parse(raw)?)
            } else if let Some(default) = &spec.default {
                Some(spec.coerce(default)?)
            } else {
                None
            };

            match resolved {
                Some(value) => {
                    values.insert(spec.name.to_string(), value);
                }
                None if spec.required => {
                    return Err(RunbookError::Config(format!(
                        "Required option {} is not set and has no default",
                        spec.name
                    )));
                }
                None => {}
            }
        }

        tracing::debug!(options = values.len(), "resolved settings");
        Ok(Settings { values })
    }
}
