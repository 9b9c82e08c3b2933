use chrono::{DateTime, Utc};

/// Links a task to the OS process currently running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub task_name: String,
    pub pid: u32,
    /// `None` for records written by tools that only store the pid.
    pub started_at: Option<DateTime<Utc>>,
}

impl ManagedProcess {
    pub fn new(task_name: impl Into<String>, pid: u32) -> Self {
        Self {
            task_name: task_name.into(),
            pid,
            started_at: Some(Utc::now()),
        }
    }
}

/// Managed processes in task declaration order, keyed by task name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: Vec<ManagedProcess>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ManagedProcess] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, task_name: &str) -> Option<&ManagedProcess> {
        self.entries.iter().find(|entry| entry.task_name == task_name)
    }

    /// Replaces the entry with the same task name in place, or appends a new one.
    /// Returns the replaced entry.
    pub fn upsert(&mut self, process: ManagedProcess) -> Option<ManagedProcess> {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.task_name == process.task_name)
        {
            Some(entry) => Some(std::mem::replace(entry, process)),
            None => {
                self.entries.push(process);
                None
            }
        }
    }

    pub fn pids(&self) -> Vec<u32> {
        self.entries.iter().map(|entry| entry.pid).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedProcess> {
        self.entries.iter()
    }
}

impl FromIterator<ManagedProcess> for Registry {
    fn from_iter<I: IntoIterator<Item = ManagedProcess>>(iter: I) -> Self {
        let mut registry = Registry::new();
        for process in iter {
            registry.upsert(process);
        }
        registry
    }
}
