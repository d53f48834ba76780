//! Child spawn plumbing
//! argv construction, environment merge, uid/gid drop, umask, session setup

use crate::config::Entry;
use crate::domain::{DomainError, Result};
use crate::process::command::split_command;
use std::ffi::CString;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Resolve a username to (uid, gid).
pub fn resolve_user(user: &str) -> Result<(u32, u32)> {
    let user_c = CString::new(user)
        .map_err(|e| DomainError::Failed(format!("invalid user string '{user}': {e}")))?;
    unsafe {
        let pwd = libc::getpwnam(user_c.as_ptr());
        if pwd.is_null() {
            return Err(DomainError::Failed(format!("user '{user}' not found")));
        }
        Ok(((*pwd).pw_uid, (*pwd).pw_gid))
    }
}

/// Build the child command from a program entry. stdout/stderr/stdin are
/// piped; the caller wires the pipes into loggers.
pub fn build_command(entry: &Entry) -> Result<Command> {
    let command_line = entry.get_string("command", "");
    let argv = split_command(&command_line).map_err(|e| DomainError::SpawnError {
        name: entry.program_name().to_string(),
        reason: e.to_string(),
    })?;

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);

    for (k, v) in entry.get_env_from_files("envFiles") {
        cmd.env(k, v);
    }
    for (k, v) in entry.get_env("environment") {
        cmd.env(k, v);
    }

    let directory = entry.get_string("directory", "");
    if !directory.is_empty() {
        cmd.current_dir(&directory);
    }

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(false);

    let ids = match entry.raw("user") {
        Some(user) if !user.is_empty() => Some(resolve_user(user)?),
        _ => None,
    };
    let umask = parse_umask(entry.raw("umask"));

    unsafe {
        cmd.pre_exec(move || {
            // the child leads its own session and process group so group
            // signalling (stopasgroup/killasgroup) reaches every descendant
            libc::setsid();

            if let Some(mask) = umask {
                libc::umask(mask as libc::mode_t);
            }
            if let Some((uid, gid)) = ids {
                if libc::setgid(gid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::setuid(uid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    Ok(cmd)
}

/// Spawn the child. Exec-time failures surface as SpawnError.
pub fn spawn(entry: &Entry) -> Result<Child> {
    let mut cmd = build_command(entry)?;
    debug!(program = %entry.program_name(), "spawning child");
    cmd.spawn().map_err(|e| DomainError::SpawnError {
        name: entry.program_name().to_string(),
        reason: e.to_string(),
    })
}

fn parse_umask(value: Option<&str>) -> Option<u32> {
    let v = value?.trim();
    if v.is_empty() {
        return None;
    }
    u32::from_str_radix(v.trim_start_matches("0o"), 8).ok()
}
