//! Collaborator ports
//! Interfaces the core consumes: loggers, event emission, file watching

pub mod events;
pub mod logger;
pub mod watcher;

pub use events::{BroadcastEmitter, Event, EventEmitter, NoopEmitter};
pub use logger::{new_logger, CompositeLogger, FileLogger, Logger, NullLogger, StdLogger};
pub use watcher::{FileChange, FileWatcher, PollingWatcher};
