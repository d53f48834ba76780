//! Domain-level errors
//! These represent supervisor business-rule violations, not infrastructure failures

use thiserror::Error;

/// Numeric fault categories returned to remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCode(pub i32);

impl FaultCode {
    pub const UNKNOWN_METHOD: FaultCode = FaultCode(1);
    pub const INCORRECT_PARAMETERS: FaultCode = FaultCode(2);
    pub const BAD_ARGUMENTS: FaultCode = FaultCode(3);
    pub const BAD_NAME: FaultCode = FaultCode(10);
    pub const BAD_SIGNAL: FaultCode = FaultCode(11);
    pub const NO_FILE: FaultCode = FaultCode(20);
    pub const NOT_EXECUTABLE: FaultCode = FaultCode(21);
    pub const FAILED: FaultCode = FaultCode(30);
    pub const ABNORMAL_TERMINATION: FaultCode = FaultCode(40);
    pub const SPAWN_ERROR: FaultCode = FaultCode(50);
    pub const ALREADY_STARTED: FaultCode = FaultCode(60);
    pub const NOT_RUNNING: FaultCode = FaultCode(70);
    pub const SUCCESS: FaultCode = FaultCode(80);
    pub const ALREADY_ADDED: FaultCode = FaultCode(90);
    pub const STILL_RUNNING: FaultCode = FaultCode(91);
    pub const CANT_REREAD: FaultCode = FaultCode(92);
}

#[derive(Debug, Error, Clone)]
pub enum DomainError {
    // Operator errors
    #[error("no process named '{0}'")]
    BadName(String),

    #[error("unknown signal '{0}'")]
    BadSignal(String),

    #[error("process '{0}' is already started")]
    AlreadyStarted(String),

    #[error("process '{0}' is not running")]
    NotRunning(String),

    #[error("process group '{0}' is already added")]
    AlreadyAdded(String),

    #[error("process group '{0}' still has running processes")]
    StillRunning(String),

    // Lifecycle errors
    #[error("failed to spawn '{name}': {reason}")]
    SpawnError { name: String, reason: String },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("operation rejected in current state: {0}")]
    IncorrectState(String),

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("configuration could not be re-read: {0}")]
    CantReread(String),

    #[error("unknown template variable '{0}'")]
    EnvVarNotFound(String),

    #[error("cannot convert template variable value '{0}' to integer")]
    EnvVarConversion(String),

    #[error("invalid string expression format")]
    InvalidStringExpression,

    #[error("template type specifier '{0}' not implemented")]
    TypeNotImplemented(String),

    // Log errors
    #[error("no log file for this target")]
    NoFile,

    #[error("bad arguments: {0}")]
    BadArguments(String),

    // Catch-all operational failure
    #[error("{0}")]
    Failed(String),
}

impl DomainError {
    /// Map the error onto the numeric fault code of the remote API.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            DomainError::BadName(_) => FaultCode::BAD_NAME,
            DomainError::BadSignal(_) => FaultCode::BAD_SIGNAL,
            DomainError::AlreadyStarted(_) => FaultCode::ALREADY_STARTED,
            DomainError::NotRunning(_) => FaultCode::NOT_RUNNING,
            DomainError::AlreadyAdded(_) => FaultCode::ALREADY_ADDED,
            DomainError::StillRunning(_) => FaultCode::STILL_RUNNING,
            DomainError::SpawnError { .. } => FaultCode::SPAWN_ERROR,
            DomainError::IncorrectState(_) | DomainError::InvalidStateTransition { .. } => {
                FaultCode::FAILED
            }
            DomainError::CantReread(_) => FaultCode::CANT_REREAD,
            DomainError::InvalidConfiguration(_)
            | DomainError::EnvVarNotFound(_)
            | DomainError::EnvVarConversion(_)
            | DomainError::InvalidStringExpression
            | DomainError::TypeNotImplemented(_) => FaultCode::INCORRECT_PARAMETERS,
            DomainError::NoFile => FaultCode::NO_FILE,
            DomainError::BadArguments(_) => FaultCode::BAD_ARGUMENTS,
            DomainError::Failed(_) => FaultCode::FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_code_mapping() {
        assert_eq!(
            DomainError::BadName("x".into()).fault_code(),
            FaultCode::BAD_NAME
        );
        assert_eq!(
            DomainError::BadSignal("SIGBOGUS".into()).fault_code(),
            FaultCode::BAD_SIGNAL
        );
        assert_eq!(
            DomainError::AlreadyStarted("web".into()).fault_code(),
            FaultCode(60)
        );
        assert_eq!(
            DomainError::NotRunning("web".into()).fault_code(),
            FaultCode(70)
        );
        assert_eq!(
            DomainError::SpawnError {
                name: "web".into(),
                reason: "enoent".into()
            }
            .fault_code(),
            FaultCode(50)
        );
        assert_eq!(
            DomainError::CantReread("parse error".into()).fault_code(),
            FaultCode(92)
        );
        assert_eq!(DomainError::NoFile.fault_code(), FaultCode(20));
    }

    #[test]
    fn test_error_display() {
        let err = DomainError::BadName("worker".to_string());
        assert_eq!(err.to_string(), "no process named 'worker'");

        let err = DomainError::SpawnError {
            name: "web".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert!(err.to_string().contains("web"));
        assert!(err.to_string().contains("No such file"));
    }
}
