//! ProcessState value object
//! Represents the lifecycle state of a supervised process

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a process in its lifecycle.
///
/// Numeric codes follow the established Supervisor API so remote callers
/// can interpret `state` fields without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProcessState {
    /// Process has been stopped or was never started
    #[default]
    Stopped,

    /// Process is starting up, inside the startsecs gate
    Starting,

    /// Process is running normally
    Running,

    /// Process exited during startup and is waiting to be retried
    Backoff,

    /// Process received a stop request and has not yet exited
    Stopping,

    /// Process exited from Running and will not be restarted
    Exited,

    /// Process gave up retrying after too many Backoff cycles
    Fatal,

    /// State could not be determined
    Unknown,
}

impl ProcessState {
    /// Numeric state code of the remote API.
    pub fn code(&self) -> i32 {
        match self {
            ProcessState::Stopped => 0,
            ProcessState::Starting => 10,
            ProcessState::Running => 20,
            ProcessState::Backoff => 30,
            ProcessState::Stopping => 40,
            ProcessState::Exited => 100,
            ProcessState::Fatal => 200,
            ProcessState::Unknown => 1000,
        }
    }

    /// Check if a child process may be alive in this state.
    pub fn has_pid(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    /// Check if the process can accept a start request.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal
        )
    }

    /// Check if the process can accept a stop request.
    pub fn can_stop(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting
                | ProcessState::Running
                | ProcessState::Backoff
                | ProcessState::Stopping
        )
    }

    /// Check if the process has come to rest.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal
        )
    }

    /// Validate a state transition against the lifecycle table.
    pub fn can_transition_to(&self, new_state: ProcessState) -> bool {
        use ProcessState::*;

        match (self, new_state) {
            // start() from a resting state
            (Stopped | Exited | Fatal, Starting) => true,

            // startsecs gate passed
            (Starting, Running) => true,
            // exited inside the startsecs gate
            (Starting, Backoff) => true,

            // retry or give up
            (Backoff, Starting) => true,
            (Backoff, Fatal) => true,

            // exit classification from Running
            (Running, Exited) => true,
            (Running, Starting) => true,

            // stop() while alive or backing off
            (Starting | Running | Backoff, Stopping) => true,

            // child gone after a stop request
            (Stopping, Stopped) => true,

            // same state is always allowed
            (a, b) if *a == b => true,

            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "STOPPED"),
            ProcessState::Starting => write!(f, "STARTING"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Backoff => write!(f, "BACKOFF"),
            ProcessState::Stopping => write!(f, "STOPPING"),
            ProcessState::Exited => write!(f, "EXITED"),
            ProcessState::Fatal => write!(f, "FATAL"),
            ProcessState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
