/*!
 * Supervisor lifecycle tests
 * Drive the library end to end with real `sleep` processes as tasks
 */

use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::unbounded;
use process_supervisor::{
    app::status, worker::liveness::is_alive, ControlMessage, Error, RegistryStore, Settings,
    Supervisor, SupervisorState, TaskDefinition,
};

const POLL: Duration = Duration::from_secs(1);

fn settings() -> Settings {
    Settings {
        poll_interval: POLL,
        terminate_timeout: Duration::from_secs(3),
    }
}

fn sleeper(dir: &Path, name: &str) -> TaskDefinition {
    TaskDefinition::new(name, &["sleep", "9999"], dir.join("logs").join(format!("{}.log", name)))
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    condition()
}

#[test]
fn test_killed_task_is_replaced_and_shutdown_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let store = RegistryStore::new(dir.path().join("supervisor.pids"));
    let (tx, rx) = unbounded();
    let tasks = vec![sleeper(dir.path(), "A"), sleeper(dir.path(), "B")];
    let mut supervisor = Supervisor::new(tasks, store.clone(), settings(), rx);

    let handle = thread::spawn(move || {
        let outcome = supervisor.run();
        (outcome, supervisor.state())
    });

    assert!(wait_until(Duration::from_secs(5), || store.load().len() == 2));
    let initial = store.load();
    let old_a = initial.get("A").unwrap().pid;
    let old_b = initial.get("B").unwrap().pid;
    assert!(is_alive(old_a) && is_alive(old_b));

    unsafe { libc::kill(old_a as i32, libc::SIGKILL) };
    thread::sleep(POLL * 2 + Duration::from_millis(500));

    let after = store.load();
    assert_eq!(after.len(), 2);
    let new_a = after.get("A").unwrap().pid;
    assert_ne!(new_a, old_a);
    assert!(is_alive(new_a));
    assert_eq!(after.get("B").unwrap().pid, old_b);
    assert_eq!(after.entries()[0].task_name, "A");

    tx.send(ControlMessage::Shutdown("test".to_string())).unwrap();
    let (outcome, state) = handle.join().unwrap();

    let report = outcome.unwrap();
    assert!(report.is_clean());
    assert_eq!(state, SupervisorState::Stopped);
    assert!(!is_alive(new_a));
    assert!(!is_alive(old_b));
    assert!(store.load().is_empty());
    assert!(status::collect(&store).is_empty());
}

#[test]
fn test_invalid_command_aborts_startup_without_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let store = RegistryStore::new(dir.path().join("supervisor.pids"));
    let (_tx, rx) = unbounded();
    let tasks = vec![
        sleeper(dir.path(), "scheduler"),
        TaskDefinition::new("bot", &["/nonexistent/telegram-bot"], dir.path().join("bot.log")),
    ];
    let mut supervisor = Supervisor::new(tasks, store.clone(), settings(), rx);

    match supervisor.run() {
        Err(Error::LaunchFailure { task, .. }) => assert_eq!(task, "bot"),
        other => panic!("expected LaunchFailure, got {:?}", other),
    }

    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(store.load().is_empty());
    assert!(!store.path().exists());
}

#[test]
fn test_second_supervisor_on_same_registry_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = RegistryStore::new(dir.path().join("supervisor.pids"));
    let (tx, rx) = unbounded();
    let mut first = Supervisor::new(vec![sleeper(dir.path(), "A")], store.clone(), settings(), rx);
    let handle = thread::spawn(move || first.run());
    assert!(wait_until(Duration::from_secs(5), || store.load().len() == 1));
    let running = store.load().get("A").unwrap().pid;

    let (_tx2, rx2) = unbounded();
    let mut second = Supervisor::new(vec![sleeper(dir.path(), "A")], store.clone(), settings(), rx2);
    assert!(matches!(second.run(), Err(Error::AlreadyRunning { .. })));
    assert_eq!(store.load().get("A").unwrap().pid, running);
    assert!(is_alive(running));

    drop(tx);
    assert!(handle.join().unwrap().unwrap().is_clean());
    assert!(!is_alive(running));
}

#[test]
fn test_registry_matches_configured_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let store = RegistryStore::new(dir.path().join("supervisor.pids"));
    let names = ["scheduler", "bot", "digest", "backup"];
    let (_tx, rx) = unbounded();
    let tasks = names.iter().map(|name| sleeper(dir.path(), name)).collect();
    let mut supervisor = Supervisor::new(tasks, store.clone(), settings(), rx);

    supervisor.start().unwrap();

    let registry = store.load();
    let recorded: Vec<&str> = registry.iter().map(|p| p.task_name.as_str()).collect();
    assert_eq!(recorded, names);
    let rows = status::collect(&store);
    assert_eq!(rows.len(), names.len());
    assert!(rows.iter().all(|row| row.state == process_supervisor::ProcessState::Running));

    supervisor.shutdown();
    assert!(registry.pids().into_iter().all(|pid| !is_alive(pid)));
}

#[test]
fn test_task_ignoring_sigterm_makes_shutdown_report_forced() {
    let dir = tempfile::tempdir().unwrap();
    let store = RegistryStore::new(dir.path().join("supervisor.pids"));
    let (tx, rx) = unbounded();
    let stubborn = TaskDefinition::new(
        "stubborn",
        &["sh", "-c", "trap '' TERM; while :; do sleep 0.1; done"],
        dir.path().join("logs").join("stubborn.log"),
    );
    let quick = Settings {
        poll_interval: POLL,
        terminate_timeout: Duration::from_millis(500),
    };
    let mut supervisor = Supervisor::new(
        vec![sleeper(dir.path(), "polite"), stubborn],
        store.clone(),
        quick,
        rx,
    );
    let handle = thread::spawn(move || supervisor.run());

    assert!(wait_until(Duration::from_secs(5), || store.load().len() == 2));
    let pid = store.load().get("stubborn").unwrap().pid;
    thread::sleep(Duration::from_millis(300));

    tx.send(ControlMessage::Shutdown("test".to_string())).unwrap();
    let report = handle.join().unwrap().unwrap();

    assert_eq!(report.forced, vec!["stubborn"]);
    assert_eq!(report.stopped, vec!["polite"]);
    assert!(!report.is_clean());
    assert_eq!(report.exit_code(), 2);
    assert!(!is_alive(pid));
    assert!(store.load().is_empty());
}
