pub mod cli;
pub mod status;
