//! Core domain types shared across the engine

mod autorestart;
mod error;
pub mod signal;
mod state;

pub use autorestart::AutoRestart;
pub use error::{DomainError, FaultCode, Result};
pub use state::ProcessState;
