use std::io;

use libc;

/// Reports whether `pid` names a running process, using `kill(pid, 0)`.
///
/// A pid that does not exist is `false`, never an error. Zombies count as dead.
/// Pids are recycled by the OS, so a stale pid may report a stranger as alive;
/// no attempt is made to detect that.
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    let exists = unsafe { libc::kill(raw, 0) } == 0
        || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);

    exists && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // The command name may contain ')' so the state is the field after the last one.
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next())
        .map_or(false, |state| state == "Z" || state == "X")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
