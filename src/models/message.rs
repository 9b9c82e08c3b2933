#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Leave the poll loop and tear every task down. Carries the reason, e.g. the signal name.
    Shutdown(String),
}
