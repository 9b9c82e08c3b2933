use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{CommandLine, TaskDefinition};

pub const DEFAULT_CONFIG_PATH: &str = "supervisor.toml";
pub const DEFAULT_REGISTRY_PATH: &str = ".supervisor/supervisor.pids";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_TERMINATE_TIMEOUT_SECS: u64 = 10;
pub const MIN_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    registry_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    terminate_timeout_secs: Option<u64>,
    #[serde(default)]
    require_files: Vec<PathBuf>,
    #[serde(default, rename = "task")]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTask {
    name: String,
    command: CommandLine,
    log: Option<PathBuf>,
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub path: PathBuf,
    pub registry_path: PathBuf,
    pub log_dir: PathBuf,
    pub poll_interval: Duration,
    pub terminate_timeout: Duration,
    pub require_files: Vec<PathBuf>,
    pub tasks: Vec<TaskDefinition>,
}

impl Config {
    /// Built-in defaults, no tasks, no environment overrides.
    pub fn defaults(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            terminate_timeout: Duration::from_secs(DEFAULT_TERMINATE_TIMEOUT_SECS),
            require_files: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Reads and validates the config file. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ConfigMissing {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(Error::config(path, e.to_string())),
        };
        Self::from_toml(path, &contents, |key| std::env::var(key).ok())
    }

    /// For commands that only need the registry: a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(Error::ConfigMissing { .. }) => {
                Self::from_toml(path, "", |key| std::env::var(key).ok())
            }
            other => other,
        }
    }

    /// Parses `contents`, then applies `SUPERVISOR_*` overrides looked up through `env`.
    pub fn from_toml<F>(path: &Path, contents: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| Error::config(path, e.message().to_string()))?;

        let registry_path = env("SUPERVISOR_REGISTRY")
            .map(PathBuf::from)
            .or(raw.registry_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_PATH));
        let log_dir = env("SUPERVISOR_LOG_DIR")
            .map(PathBuf::from)
            .or(raw.log_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let poll_interval = seconds(
            path,
            "poll_interval_secs",
            env("SUPERVISOR_POLL_INTERVAL_SECS"),
            raw.poll_interval_secs,
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        let terminate_timeout = seconds(
            path,
            "terminate_timeout_secs",
            env("SUPERVISOR_TERMINATE_TIMEOUT_SECS"),
            raw.terminate_timeout_secs,
            DEFAULT_TERMINATE_TIMEOUT_SECS,
        )?;

        let mut tasks: Vec<TaskDefinition> = Vec::with_capacity(raw.tasks.len());
        for task in raw.tasks {
            validate_name(path, &task.name)?;
            if tasks.iter().any(|existing| existing.name == task.name) {
                return Err(Error::config(path, format!("duplicate task '{}'", task.name)));
            }
            if task.command.is_empty() {
                return Err(Error::config(path, format!("task '{}' has an empty command", task.name)));
            }
            let log_path = log_dir.join(
                task.log
                    .unwrap_or_else(|| PathBuf::from(format!("{}.log", task.name))),
            );
            tasks.push(TaskDefinition {
                name: task.name,
                command: task.command,
                log_path,
                cwd: task.cwd,
                env: task.env,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            registry_path,
            log_dir,
            poll_interval,
            terminate_timeout,
            require_files: raw.require_files,
            tasks,
        })
    }

    /// Checks what `start` needs before it touches any process.
    pub fn check_preconditions(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(Error::config(&self.path, "no [[task]] entries configured"));
        }
        if let Some(missing) = self.require_files.iter().find(|file| !file.exists()) {
            return Err(Error::Precondition {
                reason: format!("required file {} does not exist", missing.display()),
            });
        }
        Ok(())
    }

    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|task| task.name == name)
    }
}

fn seconds(
    path: &Path,
    key: &str,
    from_env: Option<String>,
    from_file: Option<u64>,
    default: u64,
) -> Result<Duration> {
    let secs = match from_env {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::config(path, format!("{} override '{}' is not a number", key, value)))?,
        None => from_file.unwrap_or(default),
    };
    if secs < MIN_INTERVAL_SECS {
        return Err(Error::config(
            path,
            format!("{} must be at least {} second(s)", key, MIN_INTERVAL_SECS),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn validate_name(path: &Path, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::config(path, format!("invalid task name '{}'", name)))
    }
}
