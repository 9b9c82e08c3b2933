use std::{
    collections::HashMap,
    fmt,
    process::Child,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::manager::registry_store::{RegistryLock, RegistryStore};
use crate::models::{ControlMessage, Registry, TaskDefinition};
use crate::worker::{launcher, liveness, reaper, Launched};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Initializing => "INITIALIZING",
            SupervisorState::Running => "RUNNING",
            SupervisorState::ShuttingDown => "SHUTTING_DOWN",
            SupervisorState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub poll_interval: Duration,
    pub terminate_timeout: Duration,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            terminate_timeout: config.terminate_timeout,
        }
    }
}

/// Which tasks stopped on SIGTERM and which needed SIGKILL during shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub forced: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            2
        }
    }
}

/// Keeps one live process per configured task.
///
/// `INITIALIZING` reaps whatever a previous run left in the registry, `RUNNING`
/// polls liveness every `poll_interval` and relaunches dead tasks, and a
/// [`ControlMessage::Shutdown`] moves through `SHUTTING_DOWN` to `STOPPED`.
/// The supervisor is the only writer of its registry record.
pub struct Supervisor {
    tasks: Vec<TaskDefinition>,
    store: RegistryStore,
    settings: Settings,
    control: Receiver<ControlMessage>,
    registry: Registry,
    children: HashMap<u32, Child>,
    restarts: HashMap<String, u64>,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(
        tasks: Vec<TaskDefinition>,
        store: RegistryStore,
        settings: Settings,
        control: Receiver<ControlMessage>,
    ) -> Self {
        Self {
            tasks,
            store,
            settings,
            control,
            registry: Registry::new(),
            children: HashMap::new(),
            restarts: HashMap::new(),
            state: SupervisorState::Initializing,
        }
    }

    pub fn from_config(config: &Config, control: Receiver<ControlMessage>) -> Self {
        Self::new(
            config.tasks.clone(),
            RegistryStore::new(&config.registry_path),
            Settings::from(config),
            control,
        )
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn restarts(&self, task_name: &str) -> u64 {
        self.restarts.get(task_name).copied().unwrap_or(0)
    }

    /// Full lifecycle: lock the record, start every task, supervise until a
    /// shutdown message arrives, then stop everything.
    pub fn run(&mut self) -> Result<ShutdownReport> {
        let _lock = RegistryLock::acquire(&self.store)?;
        self.start()?;
        let outcome = self.watch();
        let report = self.shutdown();
        outcome.map(|()| report)
    }

    /// `INITIALIZING` then `RUNNING`. If any task fails to launch, everything
    /// launched so far is terminated and the registry is cleared.
    pub fn start(&mut self) -> Result<()> {
        self.set_state(SupervisorState::Initializing);
        self.reap_stale()?;

        for index in 0..self.tasks.len() {
            let task = self.tasks[index].clone();
            let launched = match launcher::launch(&task) {
                Ok(launched) => launched,
                Err(e) => {
                    error!("{}; aborting startup.", e);
                    self.abort_startup();
                    return Err(e);
                }
            };
            self.adopt(launched);
            if let Err(e) = self.store.save(&self.registry) {
                error!("{}; aborting startup.", e);
                self.abort_startup();
                return Err(e);
            }
        }

        self.set_state(SupervisorState::Running);
        Ok(())
    }

    /// Sleeps between poll cycles until told to shut down. A closed control
    /// channel also ends supervision. Fails only when the registry cannot be written.
    pub fn watch(&mut self) -> Result<()> {
        loop {
            match self.control.recv_timeout(self.settings.poll_interval) {
                Ok(ControlMessage::Shutdown(reason)) => {
                    info!("Shutdown requested ({}).", reason);
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.poll()?;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Control channel closed; shutting down.");
                    return Ok(());
                }
            }
        }
    }

    /// One pass over every task: relaunch the dead ones and persist each change.
    /// Returns the names of the tasks that were restarted.
    pub fn poll(&mut self) -> Result<Vec<String>> {
        self.collect_exited();

        let mut restarted = Vec::new();
        for index in 0..self.tasks.len() {
            let task = self.tasks[index].clone();
            let current = self.registry.get(&task.name).map(|entry| entry.pid);
            if current.map_or(false, |pid| self.is_running(pid)) {
                continue;
            }

            match current {
                Some(pid) => warn!("Task '{}' (pid {}) is not running, restarting.", task.name, pid),
                None => warn!("Task '{}' has no process, starting it.", task.name),
            }

            match launcher::launch(&task) {
                Ok(launched) => {
                    let count = self.restarts.entry(task.name.clone()).or_insert(0);
                    *count += 1;
                    info!(
                        "Task '{}' restarted with pid {} (restart #{}).",
                        task.name,
                        launched.pid(),
                        count
                    );
                    self.adopt(launched);
                    self.store.save(&self.registry)?;
                    restarted.push(task.name);
                }
                Err(e) => {
                    error!("{}; retrying in {:?}.", e, self.settings.poll_interval);
                }
            }
        }

        Ok(restarted)
    }

    /// `SHUTTING_DOWN` then `STOPPED`: terminate every task and clear the record.
    pub fn shutdown(&mut self) -> ShutdownReport {
        self.set_state(SupervisorState::ShuttingDown);
        let report = self.terminate_all();
        if let Err(e) = self.store.clear() {
            error!("{}", e);
        }
        self.set_state(SupervisorState::Stopped);
        report
    }

    fn reap_stale(&mut self) -> Result<()> {
        let stale = self.store.load();
        if !stale.is_empty() {
            warn!(
                "Registry {} lists {} process(es) from a previous run, terminating them.",
                self.store.path().display(),
                stale.len()
            );
        }
        for entry in stale.iter() {
            let outcome = reaper::terminate(entry.pid, self.settings.terminate_timeout);
            info!("Stale task '{}' (pid {}): {:?}.", entry.task_name, entry.pid, outcome);
        }
        self.store.clear()
    }

    fn abort_startup(&mut self) {
        self.terminate_all();
        if let Err(e) = self.store.clear() {
            error!("{}", e);
        }
        self.set_state(SupervisorState::Stopped);
    }

    fn terminate_all(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let registry = std::mem::take(&mut self.registry);

        for entry in registry.iter() {
            let outcome = reaper::terminate(entry.pid, self.settings.terminate_timeout);
            if let Some(mut child) = self.children.remove(&entry.pid) {
                if let Err(e) = child.try_wait() {
                    warn!("Failed to reap task '{}' (pid {}): {}", entry.task_name, entry.pid, e);
                }
            }
            if outcome.was_forced() {
                report.forced.push(entry.task_name.clone());
            } else {
                report.stopped.push(entry.task_name.clone());
            }
        }

        report
    }

    fn adopt(&mut self, launched: Launched) {
        let Launched { process, child } = launched;
        self.children.insert(process.pid, child);
        if let Some(previous) = self.registry.upsert(process) {
            if let Some(mut child) = self.children.remove(&previous.pid) {
                let _ = child.try_wait();
            }
        }
    }

    /// Collects exit statuses of our own children so they do not stay zombies.
    fn collect_exited(&mut self) {
        let mut exited = Vec::new();
        for (pid, child) in self.children.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => exited.push((*pid, status)),
                Ok(None) => {}
                Err(e) => warn!("Failed to check pid {}: {}", pid, e),
            }
        }

        for (pid, status) in exited {
            self.children.remove(&pid);
            let name = self
                .registry
                .iter()
                .find(|entry| entry.pid == pid)
                .map_or("?", |entry| entry.task_name.as_str());
            warn!("Task '{}' (pid {}) exited: {}.", name, pid, status);
        }
    }

    fn is_running(&self, pid: u32) -> bool {
        liveness::is_alive(pid)
    }

    fn set_state(&mut self, state: SupervisorState) {
        if self.state != state {
            info!("Supervisor {} -> {}.", self.state, state);
        }
        self.state = state;
    }
}
