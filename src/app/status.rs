use chrono::{DateTime, Utc};
use crossterm::style::Stylize;

use crate::manager::registry_store::RegistryStore;
use crate::models::ProcessState;
use crate::worker::liveness::is_alive;

const SECONDS_IN_DAY: i64 = 24 * 60 * 60;
const SECONDS_IN_HOUR: i64 = 60 * 60;
const SECONDS_IN_MINUTE: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub task_name: String,
    pub pid: u32,
    pub state: ProcessState,
    pub started_at: Option<DateTime<Utc>>,
}

/// Reads the registry and probes every entry. Never writes the record:
/// stopped entries are left for the next supervisor run or `stop`.
pub fn collect(store: &RegistryStore) -> Vec<StatusRow> {
    store
        .load()
        .iter()
        .map(|entry| StatusRow {
            task_name: entry.task_name.clone(),
            pid: entry.pid,
            state: ProcessState::from_alive(is_alive(entry.pid)),
            started_at: entry.started_at,
        })
        .collect()
}

pub fn render(rows: &[StatusRow], styled: bool, now: DateTime<Utc>) -> String {
    if rows.is_empty() {
        return "No supervised processes\n".to_string();
    }

    let width = rows
        .iter()
        .map(|row| row.task_name.len())
        .max()
        .unwrap_or(0)
        .max("TASK".len());

    let header = format!("{:<width$}  {:>8}  {:<8}  {}", "TASK", "PID", "STATE", "UPTIME");
    let mut out = String::new();
    out.push_str(&if styled { header.bold().to_string() } else { header });
    out.push('\n');

    for row in rows {
        let state = format!("{:<8}", row.state.to_string());
        let state = match (styled, row.state) {
            (false, _) => state,
            (true, ProcessState::Running) => state.green().to_string(),
            (true, ProcessState::Stopped) => state.red().to_string(),
        };
        let uptime = match (row.state, row.started_at) {
            (ProcessState::Running, Some(started_at)) => format_uptime(started_at, now),
            _ => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<width$}  {:>8}  {}  {}\n",
            row.task_name, row.pid, state, uptime
        ));
    }

    out
}

pub fn format_uptime(started_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match now.signed_duration_since(started_at).num_seconds().max(0) {
        s if s >= SECONDS_IN_DAY => format!("{}d", s / SECONDS_IN_DAY),
        s if s >= SECONDS_IN_HOUR => format!("{}h", s / SECONDS_IN_HOUR),
        s if s >= SECONDS_IN_MINUTE => format!("{}m", s / SECONDS_IN_MINUTE),
        s => format!("{}s", s),
    }
}
