use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, Stdio},
};

use libc;
use log::{error, info};

use crate::error::{Error, Result};
use crate::models::{ManagedProcess, TaskDefinition};

/// A freshly spawned task. The `Child` handle is kept so the exit status can be
/// collected later and the process does not linger as a zombie.
#[derive(Debug)]
pub struct Launched {
    pub process: ManagedProcess,
    pub child: Child,
}

impl Launched {
    pub fn pid(&self) -> u32 {
        self.process.pid
    }
}

/// Spawns `task` in its own session with stdout and stderr appended to its log.
/// Returns as soon as the process exists; it does not wait for the task to be ready.
pub fn launch(task: &TaskDefinition) -> Result<Launched> {
    let failure = |source: io::Error| Error::LaunchFailure {
        task: task.name.clone(),
        source,
    };

    let argv = task.command.argv();
    let (program, args) = match argv.split_first() {
        Some((program, args)) if !program.is_empty() => (*program, args),
        _ => {
            return Err(failure(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command",
            )))
        }
    };

    let stdout = open_log(&task.log_path).map_err(failure)?;
    let stderr = stdout.try_clone().map_err(failure)?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&task.env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    if let Some(cwd) = &task.cwd {
        command.current_dir(cwd);
    }
    // SAFETY: `detach` only calls async-signal-safe libc functions.
    unsafe {
        command.pre_exec(detach);
    }

    match command.spawn() {
        Ok(child) => {
            let process = ManagedProcess::new(task.name.clone(), child.id());
            info!("Task '{}' started with pid {} ({}).", task.name, process.pid, task.command);
            Ok(Launched { process, child })
        }
        Err(e) => {
            error!("Failed to start task '{}' ({}): {}", task.name, task.command, e);
            Err(failure(e))
        }
    }
}

fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Runs in the forked child before exec: clears the signal mask inherited from
/// the supervisor and starts a new session so the task outlives our terminal.
fn detach() -> io::Result<()> {
    unsafe {
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        if libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
