use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The task's executable could not be spawned.
    #[error("[LaunchFailure]: task '{task}' could not be started: {source}")]
    LaunchFailure {
        task: String,
        #[source]
        source: io::Error,
    },

    /// Graceful termination did not finish in time and SIGKILL was sent.
    #[error("[TerminationTimeout]: pid {pid} still alive after {timeout:?}, forcing kill")]
    TerminationTimeout { pid: u32, timeout: Duration },

    #[error("[RegistryCorrupt]: {path}:{line}: {reason}")]
    RegistryCorrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("[Registry]: cannot access {path}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("[Config]: config file {path} not found")]
    ConfigMissing { path: PathBuf },

    #[error("[Config]: {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("[Precondition]: {reason}")]
    Precondition { reason: String },

    #[error("[AlreadyRunning]: another supervisor (pid {pid}) owns this registry")]
    AlreadyRunning { pid: u32 },
}

impl Error {
    pub fn registry(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Registry {
            path: path.into(),
            source,
        }
    }

    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status for a `start` invocation that fails with this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
