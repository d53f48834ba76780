//! Supervisor Engine
//!
//! A library for supervising child processes:
//! - Per-process lifecycle state machine (start/stop/restart policies,
//!   exit classification, backoff, fatality)
//! - Collection-level process manager with group membership and
//!   priority-ordered bulk operations
//! - Declarative INI configuration with template expansion and three-way
//!   reload reconciliation
//! - HTTP API over the established Supervisor operation surface
//!
//! ## Architecture
//!
//! - **domain**: states, policies, signals, and the error taxonomy
//! - **config**: configuration model and reconciliation inputs
//! - **process**: the lifecycle engine, one monitor task per child
//! - **manager**: the keyed registry and bulk dispatch
//! - **supervisor**: the facade adapters talk to
//! - **ports**: collaborator interfaces (logger, events, file watcher)
//! - **adapters**: the HTTP transport
//!
//! The daemon binary (`visord`) wires these together:
//!
//! ```rust,ignore
//! use visor_engine::{daemon::Daemon, ports::BroadcastEmitter, supervisor::Supervisor};
//!
//! let events = std::sync::Arc::new(BroadcastEmitter::default());
//! let supervisor = std::sync::Arc::new(Supervisor::new(config_path, events));
//! Daemon::new(supervisor).run().await?;
//! ```

pub mod adapters;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod manager;
pub mod ports;
pub mod process;
pub mod supervisor;

pub use config::{Config, ConfigDiff, Entry};
pub use domain::{AutoRestart, DomainError, FaultCode, ProcessState};
pub use manager::Manager;
pub use process::{Process, ProcessInfo};
pub use supervisor::Supervisor;
