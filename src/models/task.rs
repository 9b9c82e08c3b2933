use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde::Deserialize;

/// Executable and arguments of a task, either as an argv list or as a single
/// whitespace-separated line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Argv(Vec<String>),
    Line(String),
}

impl CommandLine {
    pub fn argv(&self) -> Vec<&str> {
        match self {
            CommandLine::Argv(args) => args.iter().map(String::as_str).collect(),
            CommandLine::Line(line) => line.split_whitespace().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.argv().first().map_or(true, |program| program.is_empty())
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// A configured long-running command. Immutable once the supervisor starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    pub command: CommandLine,
    pub log_path: PathBuf,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, argv: &[&str], log_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: CommandLine::Argv(argv.iter().map(|arg| arg.to_string()).collect()),
            log_path: log_path.into(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
}

impl ProcessState {
    pub fn from_alive(alive: bool) -> Self {
        if alive {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Running => f.write_str("RUNNING"),
            ProcessState::Stopped => f.write_str("STOPPED"),
        }
    }
}
