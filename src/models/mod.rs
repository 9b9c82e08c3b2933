pub mod message;
pub mod registry;
pub mod task;

pub use message::ControlMessage;
pub use registry::{ManagedProcess, Registry};
pub use task::{CommandLine, ProcessState, TaskDefinition};
