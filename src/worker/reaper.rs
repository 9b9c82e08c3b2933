use std::{
    io, thread,
    time::{Duration, Instant},
};

use libc;
use log::{debug, info, warn};

use crate::error::Error;
use crate::worker::liveness::is_alive;

pub const TERMINATION_CHECK_INTERVAL: Duration = Duration::from_millis(100);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing was running under that pid.
    NotRunning,
    /// Exited after SIGTERM within the timeout.
    Exited,
    /// Needed SIGKILL.
    Killed,
}

impl Termination {
    pub fn was_forced(&self) -> bool {
        matches!(self, Termination::Killed)
    }
}

/// Which processes a signal reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// The process group led by the pid; tasks are session leaders.
    Group,
    /// Only the pid itself.
    Process,
}

/// Asks task `pid` and its process group to stop with SIGTERM, waits up to
/// `timeout`, then SIGKILLs them. Terminating a pid that is already gone is a no-op.
pub fn terminate(pid: u32, timeout: Duration) -> Termination {
    terminate_scoped(pid, timeout, Scope::Group)
}

/// Like [`terminate`], but never signals anything besides `pid`. For processes
/// this crate did not launch into their own session, such as a resident supervisor.
pub fn terminate_process(pid: u32, timeout: Duration) -> Termination {
    terminate_scoped(pid, timeout, Scope::Process)
}

fn terminate_scoped(pid: u32, timeout: Duration, scope: Scope) -> Termination {
    // kill(-1) would signal every process we may signal.
    if pid <= 1 || pid == std::process::id() {
        warn!("Refusing to terminate pid {}.", pid);
        return Termination::NotRunning;
    }
    if !is_alive(pid) {
        debug!("pid {} is not running, nothing to terminate.", pid);
        return Termination::NotRunning;
    }

    send(pid, libc::SIGTERM, scope);
    if wait_for_exit(pid, timeout) {
        info!("pid {} stopped.", pid);
        return Termination::Exited;
    }

    warn!("{}", Error::TerminationTimeout { pid, timeout });
    send(pid, libc::SIGKILL, scope);
    if !wait_for_exit(pid, KILL_CONFIRM_TIMEOUT) {
        warn!("pid {} still present after SIGKILL.", pid);
    }
    Termination::Killed
}

/// Polls liveness until the process disappears or `timeout` elapses.
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(TERMINATION_CHECK_INTERVAL.min(deadline - now));
    }
}

/// With [`Scope::Group`], signals the process group led by `pid`, falling back
/// to the single process when no such group exists.
fn send(pid: u32, signal: libc::c_int, scope: Scope) {
    let raw = pid as i32;
    unsafe {
        if scope == Scope::Group && libc::kill(-raw, signal) == 0 {
            return;
        }
        if libc::kill(raw, signal) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!("Failed to send signal {} to pid {}: {}", signal, pid, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{BufRead, BufReader},
        os::unix::process::CommandExt,
        process::{Command, Stdio},
    };

    /// A shell leading its own process group with a `sleep` member; returns both pids.
    fn group_with_member() -> (std::process::Child, u32) {
        let mut leader = Command::new("sh")
            .args(["-c", "sleep 30 & echo $!; wait"])
            .process_group(0)
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut line = String::new();
        BufReader::new(leader.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        (leader, line.trim().parse().unwrap())
    }

    #[test]
    fn dead_pid_is_a_no_op() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert_eq!(terminate(pid, Duration::from_secs(1)), Termination::NotRunning);
    }

    #[test]
    fn reserved_pids_are_never_signalled() {
        assert_eq!(terminate(1, Duration::from_millis(10)), Termination::NotRunning);
        assert_eq!(
            terminate(std::process::id(), Duration::from_millis(10)),
            Termination::NotRunning
        );
    }

    #[test]
    fn graceful_exit_within_timeout() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        let outcome = terminate(pid, Duration::from_secs(5));

        assert_eq!(outcome, Termination::Exited);
        assert!(!outcome.was_forced());
        child.wait().unwrap();
    }

    #[test]
    fn ignored_sigterm_escalates_to_kill() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; while :; do sleep 0.1; done"])
            .spawn()
            .unwrap();
        let pid = child.id();
        thread::sleep(Duration::from_millis(200));

        let outcome = terminate(pid, Duration::from_millis(500));

        assert_eq!(outcome, Termination::Killed);
        assert!(outcome.was_forced());
        child.wait().unwrap();
        assert!(!is_alive(pid));
    }

    #[test]
    fn wait_for_exit_times_out_on_live_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        assert!(!wait_for_exit(child.id(), Duration::from_millis(250)));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn process_scope_leaves_the_rest_of_the_group_alone() {
        let (mut leader, member) = group_with_member();

        assert_eq!(terminate_process(leader.id(), Duration::from_secs(5)), Termination::Exited);
        leader.wait().unwrap();
        assert!(is_alive(member));

        unsafe { libc::kill(member as i32, libc::SIGKILL) };
    }

    #[test]
    fn group_scope_takes_the_whole_group() {
        let (mut leader, member) = group_with_member();

        assert_eq!(terminate(leader.id(), Duration::from_secs(5)), Termination::Exited);
        leader.wait().unwrap();
        assert!(wait_for_exit(member, Duration::from_secs(2)));
    }
}
