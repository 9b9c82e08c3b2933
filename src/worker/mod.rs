pub mod launcher;
pub mod liveness;
pub mod reaper;

pub use launcher::{launch, Launched};
pub use liveness::is_alive;
pub use reaper::{terminate, terminate_process, Termination};
