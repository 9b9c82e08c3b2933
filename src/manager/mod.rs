pub mod registry_store;
pub mod supervisor;

pub use registry_store::{RegistryLock, RegistryStore};
pub use supervisor::{Settings, ShutdownReport, Supervisor, SupervisorState};
