//! Single-host supervisor for long-running tasks: launches them detached,
//! records their pids in a registry file, restarts the ones that die, and
//! tears everything down on request.

pub mod app;
pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod signals;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use manager::{RegistryLock, RegistryStore, Settings, ShutdownReport, Supervisor, SupervisorState};
pub use models::{ControlMessage, ManagedProcess, ProcessState, Registry, TaskDefinition};
