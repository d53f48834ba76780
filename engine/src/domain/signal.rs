//! Signal-name table
//! Pure static mapping from signal names to numbers, plus kill helpers

use crate::domain::{DomainError, Result};

/// Signal names of the configuration surface. Names may be given with or
/// without the `SIG` prefix.
static SIGNAL_TABLE: &[(&str, i32)] = &[
    ("SIGABRT", libc::SIGABRT),
    ("SIGALRM", libc::SIGALRM),
    ("SIGBUS", libc::SIGBUS),
    ("SIGCHLD", libc::SIGCHLD),
    ("SIGCONT", libc::SIGCONT),
    ("SIGFPE", libc::SIGFPE),
    ("SIGHUP", libc::SIGHUP),
    ("SIGILL", libc::SIGILL),
    ("SIGINT", libc::SIGINT),
    ("SIGIO", libc::SIGIO),
    ("SIGKILL", libc::SIGKILL),
    ("SIGPIPE", libc::SIGPIPE),
    ("SIGPROF", libc::SIGPROF),
    ("SIGQUIT", libc::SIGQUIT),
    ("SIGSEGV", libc::SIGSEGV),
    ("SIGSTOP", libc::SIGSTOP),
    ("SIGSYS", libc::SIGSYS),
    ("SIGTERM", libc::SIGTERM),
    ("SIGTRAP", libc::SIGTRAP),
    ("SIGTSTP", libc::SIGTSTP),
    ("SIGTTIN", libc::SIGTTIN),
    ("SIGTTOU", libc::SIGTTOU),
    ("SIGURG", libc::SIGURG),
    ("SIGUSR1", libc::SIGUSR1),
    ("SIGUSR2", libc::SIGUSR2),
    ("SIGVTALRM", libc::SIGVTALRM),
    ("SIGWINCH", libc::SIGWINCH),
    ("SIGXCPU", libc::SIGXCPU),
    ("SIGXFSZ", libc::SIGXFSZ),
];

/// Resolve a signal name (`TERM` or `SIGTERM`) to its number.
pub fn to_signal(name: &str) -> Result<i32> {
    let upper = name.to_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    SIGNAL_TABLE
        .iter()
        .find(|(n, _)| *n == full)
        .map(|(_, s)| *s)
        .ok_or_else(|| DomainError::BadSignal(name.to_string()))
}

/// Send `sig` to `pid`, or to its whole process group when `to_group` is set.
///
/// ESRCH is not an error: the child may have exited between the state check
/// and the kill.
pub fn kill(pid: u32, sig: i32, to_group: bool) -> Result<()> {
    let target = if to_group {
        -(pid as i32)
    } else {
        pid as i32
    };
    let rc = unsafe { libc::kill(target, sig) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(DomainError::Failed(format!(
            "failed to send signal {sig} to {target}: {err}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_signal_with_prefix() {
        assert_eq!(to_signal("SIGTERM").unwrap(), libc::SIGTERM);
        assert_eq!(to_signal("SIGKILL").unwrap(), libc::SIGKILL);
        assert_eq!(to_signal("SIGUSR1").unwrap(), libc::SIGUSR1);
    }

    #[test]
    fn test_to_signal_without_prefix() {
        assert_eq!(to_signal("TERM").unwrap(), libc::SIGTERM);
        assert_eq!(to_signal("hup").unwrap(), libc::SIGHUP);
        assert_eq!(to_signal("int").unwrap(), libc::SIGINT);
    }

    #[test]
    fn test_to_signal_unknown() {
        assert!(matches!(
            to_signal("SIGBOGUS"),
            Err(DomainError::BadSignal(_))
        ));
        assert!(matches!(to_signal(""), Err(DomainError::BadSignal(_))));
    }

    #[test]
    fn test_kill_gone_pid_is_ok() {
        // Signalling a long-gone pid reports success, not an error.
        assert!(kill(u32::MAX / 2, libc::SIGTERM, false).is_ok());
    }
}
