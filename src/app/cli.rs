use std::{
    collections::VecDeque,
    fs::File,
    io::{self, BufRead, BufReader, IsTerminal, Write},
    path::Path,
    time::Duration,
};

use chrono::Utc;
use crossbeam_channel::Receiver;
use log::{error, info, warn};

use crate::app::status;
use crate::config::Config;
use crate::manager::{
    registry_store::{RegistryLock, RegistryStore},
    supervisor::Supervisor,
};
use crate::models::ControlMessage;
use crate::worker::reaper::{self, Termination};

/// Extra time granted to a resident supervisor on top of its own task timeouts.
const SUPERVISOR_GRACE: Duration = Duration::from_secs(2);

/// Runs the resident supervisor until `control` delivers a shutdown.
pub fn start(config_path: &Path, control: Receiver<ControlMessage>) -> i32 {
    let config = match Config::load(config_path).and_then(|config| {
        config.check_preconditions()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };

    info!(
        "Supervising {} task(s), registry {}, poll every {:?}.",
        config.tasks.len(),
        config.registry_path.display(),
        config.poll_interval
    );

    let mut supervisor = Supervisor::from_config(&config, control);
    match supervisor.run() {
        Ok(report) => {
            if !report.is_clean() {
                warn!("Forced kill needed for: {}", report.forced.join(", "));
            }
            info!("Supervisor stopped.");
            report.exit_code()
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

/// Stops a resident supervisor (if any), then every process still on record.
/// Always succeeds: an empty or missing registry is nothing to do.
pub fn stop(config_path: &Path) -> i32 {
    let config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using defaults.", e);
            Config::defaults(config_path)
        }
    };
    let store = RegistryStore::new(&config.registry_path);

    if let Some(pid) = RegistryLock::holder(&store) {
        let entries = store.load().len() as u32;
        let timeout = config.terminate_timeout * (entries + 1) + SUPERVISOR_GRACE;
        info!("Stopping supervisor (pid {}).", pid);
        reaper::terminate_process(pid, timeout);
    }

    let results = stop_registered(&store, config.terminate_timeout);
    if results.is_empty() {
        println!("No supervised processes");
    }
    for (task_name, pid, outcome) in results {
        let verb = match outcome {
            Termination::NotRunning => "was not running",
            Termination::Exited => "stopped",
            Termination::Killed => "killed",
        };
        println!("{} (pid {}) {}", task_name, pid, verb);
    }
    0
}

/// Terminates every registry entry, then clears the record.
pub fn stop_registered(store: &RegistryStore, timeout: Duration) -> Vec<(String, u32, Termination)> {
    let registry = store.load();
    let results = registry
        .iter()
        .map(|entry| {
            let outcome = reaper::terminate(entry.pid, timeout);
            (entry.task_name.clone(), entry.pid, outcome)
        })
        .collect();

    if let Err(e) = store.clear() {
        error!("{}", e);
    }
    results
}

pub fn status(config_path: &Path) -> i32 {
    let config = Config::load_or_default(config_path).unwrap_or_else(|e| {
        warn!("{}; using defaults.", e);
        Config::defaults(config_path)
    });
    let rows = status::collect(&RegistryStore::new(&config.registry_path));
    let styled = io::stdout().is_terminal();

    print!("{}", status::render(&rows, styled, Utc::now()));
    let _ = io::stdout().flush();
    0
}

pub fn logs(config_path: &Path, task_name: &str, lines: usize) -> i32 {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return e.exit_code();
        }
    };
    let Some(task) = config.task(task_name) else {
        eprintln!("Task '{}' not found.", task_name);
        return 1;
    };

    match tail(&task.log_path, lines) {
        Ok(tail) => {
            for line in tail {
                println!("{}", line);
            }
            0
        }
        Err(e) => {
            eprintln!("Cannot read {}: {}", task.log_path.display(), e);
            1
        }
    }
}

/// Last `count` lines of the file at `path`. Task output is raw bytes, so
/// invalid UTF-8 is replaced rather than rejected.
pub fn tail(path: &Path, count: usize) -> io::Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut window = VecDeque::with_capacity(count);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if count == 0 {
            continue;
        }
        if window.len() == count {
            window.pop_front();
        }
        let line = buf.strip_suffix(b"\n").unwrap_or(&buf);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        window.push_back(String::from_utf8_lossy(line).into_owned());
    }
    Ok(window.into())
}
