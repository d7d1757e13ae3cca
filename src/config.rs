//! Configuration management for procward.
use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::Regex;
use serde::Deserialize;

use crate::{
    constants::{
        DEFAULT_DISCOVERY_NAMESPACE, DEFAULT_MONITOR_INTERVAL, DEFAULT_NAMESPACE,
        DEFAULT_PROC_ROOT, DEFAULT_RESTART_BACKOFF, DEFAULT_RESTORE_DELAY,
        DEFAULT_SCRIPT_TIMEOUT, DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_TERMINATION_GRACE,
    },
    error::RegistryError,
    process::{ProcessKey, ProcessSpec, RestartPolicy},
    registry::RegistrySettings,
    runtime::{self, RuntimeMode},
};

/// Represents the structure of the configuration file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Configuration version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Snapshot location. Defaults to the state directory.
    pub snapshot_path: Option<String>,
    /// Directory receiving captured stdout/stderr of spawned processes.
    pub log_dir: Option<String>,
    pub restart_backoff: Option<String>,
    pub restore_delay: Option<String>,
    pub termination_grace: Option<String>,
    pub script_timeout: Option<String>,
    pub monitor_interval: Option<String>,
    pub snapshot_interval: Option<String>,
    pub proc_root: Option<String>,
    pub discovery_namespace: Option<String>,
    /// Processes registered on boot.
    #[serde(default)]
    pub processes: Vec<ProcessDefinition>,
    /// Root directory from which relative paths are resolved.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_autostart() -> bool {
    true
}

/// Configuration for an individual process.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessDefinition {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    /// Executable, or a full shell command line when `args` is empty.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Optional `KEY=VALUE` file merged under `env`.
    pub env_file: Option<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Start the process right after registration.
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

impl ProcessDefinition {
    pub fn key(&self) -> ProcessKey {
        ProcessKey::new(&self.namespace, &self.name)
    }

    /// Builds the registry spec, resolving relative paths against `base`.
    pub fn to_spec(&self, base: &Path) -> Result<ProcessSpec, RegistryError> {
        let mut env = BTreeMap::new();
        if let Some(file) = &self.env_file {
            env.extend(load_env_file(&resolve_path(base, file))?);
        }
        env.extend(self.env.clone());

        Ok(ProcessSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env,
            working_dir: self
                .working_dir
                .as_ref()
                .map(|dir| resolve_path(base, dir).to_string_lossy().into_owned()),
            restart: self.restart,
            user: self.user.clone(),
            discovery: None,
        })
    }
}

impl Config {
    fn base_dir(&self) -> PathBuf {
        self.project_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Registry timing and discovery settings, with defaults for absent values.
    pub fn registry_settings(&self) -> Result<RegistrySettings, RegistryError> {
        let base = self.base_dir();
        Ok(RegistrySettings {
            restart_backoff: duration_or(&self.restart_backoff, DEFAULT_RESTART_BACKOFF)?,
            restore_delay: duration_or(&self.restore_delay, DEFAULT_RESTORE_DELAY)?,
            termination_grace: duration_or(
                &self.termination_grace,
                DEFAULT_TERMINATION_GRACE,
            )?,
            script_timeout: duration_or(&self.script_timeout, DEFAULT_SCRIPT_TIMEOUT)?,
            proc_root: PathBuf::from(
                self.proc_root.as_deref().unwrap_or(DEFAULT_PROC_ROOT),
            ),
            discovery_namespace: self
                .discovery_namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_DISCOVERY_NAMESPACE.to_string()),
            log_dir: self.log_dir.as_ref().map(|dir| resolve_path(&base, dir)),
        })
    }

    pub fn monitor_interval(&self) -> Result<Duration, RegistryError> {
        duration_or(&self.monitor_interval, DEFAULT_MONITOR_INTERVAL)
    }

    pub fn snapshot_interval(&self) -> Result<Duration, RegistryError> {
        duration_or(&self.snapshot_interval, DEFAULT_SNAPSHOT_INTERVAL)
    }

    pub fn snapshot_path(&self, mode: RuntimeMode) -> PathBuf {
        match &self.snapshot_path {
            Some(path) => resolve_path(&self.base_dir(), path),
            None => runtime::default_snapshot_path(mode),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for definition in &self.processes {
            let key = definition.key();
            key.validate()?;
            if !seen.insert(key.clone()) {
                return Err(RegistryError::InvalidConfig(format!(
                    "process '{key}' is defined more than once"
                )));
            }
        }
        Ok(())
    }
}

fn resolve_path(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn duration_or(value: &Option<String>, default: Duration) -> Result<Duration, RegistryError> {
    value.as_deref().map_or(Ok(default), parse_duration)
}

/// Parses `250ms`, `5s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, RegistryError> {
    let value = value.trim();
    let invalid = || RegistryError::InvalidConfig(format!("invalid duration '{value}'"));

    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(index) => value.split_at(index),
        None => (value, "s"),
    };
    let amount: u64 = number.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(invalid()),
    }
}

/// Expands `$VAR` and `${VAR}` references from the current environment.
fn expand_env_vars(input: &str) -> Result<String, RegistryError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| RegistryError::InvalidConfig(err.to_string()))?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    match missing {
        Some(var_name) => Err(RegistryError::InvalidConfig(format!(
            "missing environment variable: {var_name}"
        ))),
        None => Ok(result.into_owned()),
    }
}

/// Reads a `.env` style file into a map. Blank lines and `#` comments are ignored.
fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>, RegistryError> {
    let content = fs::read_to_string(path).map_err(|e| {
        RegistryError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let mut value = value.trim();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }
    Ok(vars)
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: &Path) -> Result<Config, RegistryError> {
    let content = fs::read_to_string(config_path).map_err(|e| {
        RegistryError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    let mut config: Config = serde_yaml::from_str(&expanded)?;

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.project_dir = Some(base_path);

    config.validate()?;
    Ok(config)
}
