//! AutoRestart value object
//! Defines whether a process that exited from Running should be restarted

use std::fmt;

/// Restart policy applied when a child exits from the Running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AutoRestart {
    /// Never restart; the process goes to Exited
    #[default]
    Never,

    /// Always restart, regardless of exit status
    Always,

    /// Restart only when the exit status is not in the expected `exitcodes` list
    Unexpected,
}

impl AutoRestart {
    /// Check whether a restart is warranted for the given exit status.
    pub fn should_restart(&self, exit_status: i32, exitcodes: &[i32]) -> bool {
        match self {
            AutoRestart::Never => false,
            AutoRestart::Always => true,
            AutoRestart::Unexpected => !exitcodes.contains(&exit_status),
        }
    }

    /// Parse the `autorestart` config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "false" | "no" | "0" => Some(AutoRestart::Never),
            "true" | "yes" | "1" => Some(AutoRestart::Always),
            "unexpected" => Some(AutoRestart::Unexpected),
            _ => None,
        }
    }
}

impl fmt::Display for AutoRestart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoRestart::Never => write!(f, "false"),
            AutoRestart::Always => write!(f, "true"),
            AutoRestart::Unexpected => write!(f, "unexpected"),
        }
    }
}
