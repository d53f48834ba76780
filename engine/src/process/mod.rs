//! Process lifecycle engine

pub mod command;
mod process;
pub mod spawn;

pub use process::{Process, ProcessInfo, ProgramOptions};
