use std::{
    collections::HashSet,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use libc;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{ManagedProcess, Registry};

/// Durable record of the supervised processes: one line per task, pid first.
///
/// Only one supervisor writes a given record (see [`RegistryLock`]); `stop` and
/// `status` invocations read it from other processes, so every save replaces
/// the file atomically.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, ".lock")
    }

    /// Writes to a temporary sibling and renames it over the record.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let to_error = |e| Error::registry(&self.path, e);
        ensure_parent(&self.path).map_err(to_error)?;

        let tmp = sibling(&self.path, ".tmp");
        let mut file = File::create(&tmp).map_err(to_error)?;
        file.write_all(render(registry).as_bytes()).map_err(to_error)?;
        file.sync_all().map_err(to_error)?;
        fs::rename(&tmp, &self.path).map_err(to_error)?;

        debug!("Registry saved to {} ({} entries).", self.path.display(), registry.len());
        Ok(())
    }

    /// Missing, unreadable and corrupt records all load as an empty registry;
    /// the latter two are logged.
    pub fn load(&self) -> Registry {
        match self.try_load() {
            Ok(registry) => registry,
            Err(e) => {
                warn!("{}; treating registry as empty.", e);
                Registry::new()
            }
        }
    }

    /// Like [`load`](Self::load) but reports corruption and I/O errors. A missing
    /// record is still an empty registry.
    pub fn try_load(&self) -> Result<Registry> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => parse(&self.path, &contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Registry::new()),
            Err(e) => Err(Error::registry(&self.path, e)),
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Registry {} cleared.", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::registry(&self.path, e)),
        }
    }
}

pub fn render(registry: &Registry) -> String {
    registry
        .iter()
        .map(|entry| match entry.started_at {
            Some(started_at) => format!(
                "{}\t{}\t{}\n",
                entry.pid,
                entry.task_name,
                started_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            ),
            None => format!("{}\t{}\n", entry.pid, entry.task_name),
        })
        .collect()
}

pub fn parse(path: &Path, contents: &str) -> Result<Registry> {
    let corrupt = |line: usize, reason: String| Error::RegistryCorrupt {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut registry = Registry::new();
    let mut names = HashSet::new();

    for (index, line) in contents.lines().enumerate() {
        let number = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split('\t');
        let pid_field = fields.next().unwrap_or_default().trim();
        let pid = match pid_field.parse::<u32>() {
            Ok(pid) if pid > 1 => pid,
            _ => return Err(corrupt(number, format!("invalid pid '{}'", pid_field))),
        };

        let task_name = match fields.next().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("task-{}", registry.len() + 1),
        };
        if !names.insert(task_name.clone()) {
            return Err(corrupt(number, format!("duplicate task '{}'", task_name)));
        }

        let started_at = match fields.next().map(str::trim) {
            Some(stamp) if !stamp.is_empty() => Some(
                DateTime::parse_from_rfc3339(stamp)
                    .map_err(|e| corrupt(number, format!("invalid timestamp '{}': {}", stamp, e)))?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };

        if fields.next().is_some() {
            return Err(corrupt(number, "too many fields".to_string()));
        }

        registry.upsert(ManagedProcess {
            task_name,
            pid,
            started_at,
        });
    }

    Ok(registry)
}

/// Exclusive `flock` on `<record>.lock`, held for the supervisor's lifetime.
/// The file carries the holder's pid so `stop` can find the resident supervisor.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
    path: PathBuf,
}

impl RegistryLock {
    pub fn acquire(store: &RegistryStore) -> Result<Self> {
        let path = store.lock_path();
        let to_error = |e| Error::registry(&path, e);

        ensure_parent(&path).map_err(to_error)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(to_error)?;

        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(Error::AlreadyRunning {
                    pid: read_pid(&mut file).unwrap_or(0),
                });
            }
            return Err(to_error(err));
        }

        file.set_len(0).map_err(to_error)?;
        write!(file, "{}", std::process::id()).map_err(to_error)?;
        file.sync_all().map_err(to_error)?;

        debug!("Acquired registry lock {}.", path.display());
        Ok(Self { file, path })
    }

    /// Pid of the supervisor currently holding the lock, if any.
    pub fn holder(store: &RegistryStore) -> Option<u32> {
        let mut file = File::open(store.lock_path()).ok()?;
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) } == 0 {
            unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            return None;
        }
        read_pid(&mut file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock.
        let _ = self.file.set_len(0);
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("registry"));
    name.push(suffix);
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Registry {
        vec![
            ManagedProcess::new("scheduler", 4242),
            ManagedProcess::new("bot", 4343),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn save_then_load_returns_the_same_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("run").join("supervisor.pids"));
        let registry = sample();

        store.save(&registry).unwrap();

        assert_eq!(store.load(), registry);
        assert!(!sibling(store.path(), ".tmp").exists());
    }

    #[test]
    fn record_has_one_pid_per_line_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("supervisor.pids"));
        store.save(&sample()).unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        let pids: Vec<&str> = contents
            .lines()
            .map(|line| line.split('\t').next().unwrap())
            .collect();
        assert_eq!(pids, vec!["4242", "4343"]);
    }

    #[test]
    fn missing_record_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("absent.pids"));
        assert!(store.try_load().unwrap().is_empty());
        assert!(store.load().is_empty());
    }

    #[test]
    fn bare_pid_lines_are_accepted() {
        let registry = parse(Path::new("r"), "101\n\n# comment\n202\n").unwrap();
        assert_eq!(registry.pids(), vec![101, 202]);
        assert_eq!(registry.entries()[0].task_name, "task-1");
        assert_eq!(registry.entries()[1].task_name, "task-2");
        assert!(registry.entries()[0].started_at.is_none());
    }

    #[test]
    fn corrupt_record_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("supervisor.pids"));
        fs::write(store.path(), "4242\tscheduler\nnot-a-pid\tbot\n").unwrap();

        match store.try_load() {
            Err(Error::RegistryCorrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected RegistryCorrupt, got {:?}", other),
        }
        assert!(store.load().is_empty());
    }

    #[test]
    fn reserved_pids_and_duplicates_are_corrupt() {
        assert!(parse(Path::new("r"), "1\tinit\n").is_err());
        assert!(parse(Path::new("r"), "0\n").is_err());
        assert!(parse(Path::new("r"), "10\tbot\n11\tbot\n").is_err());
        assert!(parse(Path::new("r"), "10\tbot\tyesterday\n").is_err());
        assert!(parse(Path::new("r"), "10\tbot\t2026-01-01T00:00:00Z\textra\n").is_err());
    }

    #[test]
    fn clear_removes_the_record_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("supervisor.pids"));
        store.save(&sample()).unwrap();

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn lock_is_exclusive_and_names_its_holder() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("supervisor.pids"));
        assert_eq!(RegistryLock::holder(&store), None);

        let lock = RegistryLock::acquire(&store).unwrap();
        assert_eq!(lock.path(), store.lock_path().as_path());
        assert_eq!(RegistryLock::holder(&store), Some(std::process::id()));
        match RegistryLock::acquire(&store) {
            Err(Error::AlreadyRunning { pid }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }

        drop(lock);
        assert_eq!(RegistryLock::holder(&store), None);
        RegistryLock::acquire(&store).unwrap();
    }
}
