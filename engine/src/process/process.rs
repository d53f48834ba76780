//! Process lifecycle unit
//!
//! One supervised child: state machine, monitoring task, backoff policy, and
//! the stop protocol. Every `Process` runs its own monitor task; operator
//! commands and child exits drive the state transitions.

use crate::config::Entry;
use crate::domain::{signal, AutoRestart, DomainError, ProcessState, Result};
use crate::ports::{new_logger, EventEmitter, Logger};
use crate::process::spawn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Parsed start/stop policy, read once from the entry at construction.
#[derive(Debug, Clone)]
pub struct ProgramOptions {
    pub autostart: bool,
    pub startsecs: u64,
    pub startretries: u32,
    pub backoff_cap: u64,
    pub autorestart: AutoRestart,
    pub exitcodes: Vec<i32>,
    pub stopsignal: i32,
    pub stopwaitsecs: u64,
    pub stopasgroup: bool,
    pub killasgroup: bool,
    pub priority: i64,
}

impl ProgramOptions {
    pub fn from_entry(entry: &Entry) -> Self {
        let stopsignal = entry
            .raw("stopsignal")
            .and_then(|name| signal::to_signal(name).ok())
            .unwrap_or(libc::SIGTERM);
        let autorestart = entry
            .raw("autorestart")
            .and_then(AutoRestart::parse)
            .unwrap_or(AutoRestart::Unexpected);
        let stopasgroup = entry.get_bool("stopasgroup", false);
        Self {
            autostart: entry.get_bool("autostart", true),
            startsecs: entry.get_int("startsecs", 1).max(0) as u64,
            startretries: entry.get_int("startretries", 3).max(0) as u32,
            backoff_cap: entry.get_int("startretries_backoff_cap", 60).max(0) as u64,
            autorestart,
            exitcodes: entry.get_exit_codes(),
            stopsignal,
            stopwaitsecs: entry.get_int("stopwaitsecs", 10).max(0) as u64,
            stopasgroup,
            // stopasgroup implies killasgroup
            killasgroup: entry.get_bool("killasgroup", false) || stopasgroup,
            priority: entry.get_int("priority", 999),
        }
    }
}

/// Mutable runtime fields, guarded by the per-process mutex.
struct Runtime {
    state: ProcessState,
    pid: Option<u32>,
    exit_status: Option<i32>,
    start_time: Option<SystemTime>,
    stop_time: Option<SystemTime>,
    retries: u32,
    spawn_error: Option<String>,
    stdin: Option<ChildStdin>,
    cancel: CancellationToken,
}

/// Consistent observer snapshot of a process, serialized for remote callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub group: String,
    pub description: String,
    pub start: i64,
    pub stop: i64,
    pub now: i64,
    pub state: i32,
    pub statename: String,
    pub spawnerr: String,
    pub exitstatus: i32,
    pub pid: u32,
}

/// One supervised child program.
pub struct Process {
    name: String,
    group: String,
    entry: Entry,
    opts: ProgramOptions,
    inner: Mutex<Runtime>,
    state_tx: watch::Sender<ProcessState>,
    events: Arc<dyn EventEmitter>,
    stdout_log: Arc<Mutex<Box<dyn Logger>>>,
    stderr_log: Arc<Mutex<Box<dyn Logger>>>,
    stderr_tail: Arc<Mutex<Vec<u8>>>,
}

/// Bytes of stderr kept in memory for spawn diagnostics.
const STDERR_TAIL_CAP: usize = 4096;

impl Process {
    /// Build a process from an expanded program entry. Loggers come from the
    /// `stdout_logfile` / `stderr_logfile` keys; `redirect_stderr` folds
    /// stderr into the stdout target.
    pub fn from_entry(entry: Entry, events: Arc<dyn EventEmitter>) -> Arc<Self> {
        let name = entry.program_name().to_string();
        let group = if entry.group.is_empty() {
            name.clone()
        } else {
            entry.group.clone()
        };
        let opts = ProgramOptions::from_entry(&entry);

        let stdout_log = new_logger(
            &entry.get_string_expression("stdout_logfile"),
            entry.get_bytes("stdout_logfile_maxbytes", 50 * 1024 * 1024),
            entry.get_int("stdout_logfile_backups", 10),
        );
        let stderr_log = new_logger(
            &entry.get_string_expression("stderr_logfile"),
            entry.get_bytes("stderr_logfile_maxbytes", 50 * 1024 * 1024),
            entry.get_int("stderr_logfile_backups", 10),
        );

        let (state_tx, _) = watch::channel(ProcessState::Stopped);
        Arc::new(Self {
            name,
            group,
            entry,
            opts,
            inner: Mutex::new(Runtime {
                state: ProcessState::Stopped,
                pid: None,
                exit_status: None,
                start_time: None,
                stop_time: None,
                retries: 0,
                spawn_error: None,
                stdin: None,
                cancel: CancellationToken::new(),
            }),
            state_tx,
            events,
            stdout_log: Arc::new(Mutex::new(stdout_log)),
            stderr_log: Arc::new(Mutex::new(stderr_log)),
            stderr_tail: Arc::new(Mutex::new(Vec::new())),
        })
    }

    // ===== Identity and snapshots =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn options(&self) -> &ProgramOptions {
        &self.opts
    }

    pub fn priority(&self) -> i64 {
        self.opts.priority
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().unwrap().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().unwrap().pid
    }

    pub fn stdout_logger(&self) -> Arc<Mutex<Box<dyn Logger>>> {
        self.stdout_log.clone()
    }

    pub fn stderr_logger(&self) -> Arc<Mutex<Box<dyn Logger>>> {
        self.stderr_log.clone()
    }

    /// Consistent (state, pid, exit status) snapshot.
    pub fn info(&self) -> ProcessInfo {
        let rt = self.inner.lock().unwrap();
        let start = to_epoch(rt.start_time);
        let stop = to_epoch(rt.stop_time);
        let now = to_epoch(Some(SystemTime::now()));
        let description = match rt.state {
            ProcessState::Running | ProcessState::Stopping => {
                let uptime = (now - start).max(0);
                format!(
                    "pid {}, uptime {:02}:{:02}:{:02}",
                    rt.pid.unwrap_or(0),
                    uptime / 3600,
                    (uptime % 3600) / 60,
                    uptime % 60
                )
            }
            ProcessState::Backoff | ProcessState::Fatal => rt
                .spawn_error
                .clone()
                .unwrap_or_else(|| "exited too quickly".to_string()),
            _ if stop > 0 => format!("exit status {}", rt.exit_status.unwrap_or(0)),
            _ => "Not started".to_string(),
        };
        ProcessInfo {
            name: self.name.clone(),
            group: self.group.clone(),
            description,
            start,
            stop,
            now,
            state: rt.state.code(),
            statename: rt.state.to_string(),
            spawnerr: rt.spawn_error.clone().unwrap_or_default(),
            exitstatus: rt.exit_status.unwrap_or(0),
            pid: rt.pid.unwrap_or(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state_tx.subscribe()
    }

    // ===== Operator commands =====

    /// Start the process. With `wait`, blocks until it leaves the
    /// Starting/Backoff cycle (Running, or a terminal state on failure).
    pub async fn start(self: &Arc<Self>, wait: bool) -> Result<()> {
        {
            let mut rt = self.inner.lock().unwrap();
            if !rt.state.can_start() {
                return Err(DomainError::AlreadyStarted(self.name.clone()));
            }
            rt.retries = 0;
            rt.spawn_error = None;
            rt.exit_status = None;
            rt.cancel = CancellationToken::new();
            let token = rt.cancel.clone();
            self.set_state(&mut rt, ProcessState::Starting);
            rt.start_time = Some(SystemTime::now());

            let this = Arc::clone(self);
            tokio::spawn(this.monitor(token));
        }

        if wait {
            let mut rx = self.subscribe();
            let _ = rx
                .wait_for(|s| !matches!(s, ProcessState::Starting | ProcessState::Backoff))
                .await;
            let rt = self.inner.lock().unwrap();
            if rt.state == ProcessState::Fatal {
                if let Some(reason) = &rt.spawn_error {
                    return Err(DomainError::SpawnError {
                        name: self.name.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Stop the process: send stopsignal, escalate to SIGKILL after
    /// stopwaitsecs. Idempotent while Stopping. With `wait`, blocks until a
    /// terminal state is reached.
    pub async fn stop(self: &Arc<Self>, wait: bool) -> Result<()> {
        let signal_pid = {
            let mut rt = self.inner.lock().unwrap();
            match rt.state {
                ProcessState::Stopping => None, // absorbed
                ProcessState::Backoff => {
                    self.set_state(&mut rt, ProcessState::Stopping);
                    rt.stop_time = Some(SystemTime::now());
                    rt.cancel.cancel();
                    None
                }
                ProcessState::Starting | ProcessState::Running => {
                    self.set_state(&mut rt, ProcessState::Stopping);
                    rt.stop_time = Some(SystemTime::now());
                    rt.pid
                }
                _ => return Err(DomainError::NotRunning(self.name.clone())),
            }
        };

        if let Some(pid) = signal_pid {
            info!(program = %self.name, pid, signal = self.opts.stopsignal, "sending stop signal");
            if let Err(e) = signal::kill(pid, self.opts.stopsignal, self.opts.stopasgroup) {
                warn!(program = %self.name, error = %e, "failed to deliver stop signal");
            }
            self.spawn_kill_escalation();
        }

        if wait {
            let mut rx = self.subscribe();
            let _ = rx.wait_for(|s| s.is_terminal()).await;
        }
        Ok(())
    }

    /// Arm the stopwaitsecs timer: if the process is still Stopping when it
    /// fires, escalate to SIGKILL.
    fn spawn_kill_escalation(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(this.opts.stopwaitsecs)).await;
            let pid = {
                let rt = this.inner.lock().unwrap();
                if rt.state == ProcessState::Stopping {
                    rt.pid
                } else {
                    None
                }
            };
            if let Some(pid) = pid {
                warn!(program = %this.name, pid, "stop timeout elapsed, sending SIGKILL");
                let _ = signal::kill(pid, libc::SIGKILL, this.opts.killasgroup);
            }
        });
    }

    /// Deliver an arbitrary signal to a live child.
    pub fn signal(&self, sig: i32) -> Result<()> {
        let rt = self.inner.lock().unwrap();
        match rt.pid {
            Some(pid) if rt.state.has_pid() => signal::kill(pid, sig, false),
            _ => Err(DomainError::NotRunning(self.name.clone())),
        }
    }

    /// Write to the child's stdin (used for eventlistener notifications and
    /// the sendProcessStdin operation).
    pub async fn send_stdin(&self, data: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut stdin = {
            let mut rt = self.inner.lock().unwrap();
            if !rt.state.has_pid() {
                return Err(DomainError::NotRunning(self.name.clone()));
            }
            rt.stdin
                .take()
                .ok_or_else(|| DomainError::NotRunning(self.name.clone()))?
        };
        let result = stdin.write_all(data.as_bytes()).await;
        self.inner.lock().unwrap().stdin = Some(stdin);
        result.map_err(|e| DomainError::Failed(format!("stdin write failed: {e}")))
    }

    // ===== Monitor task =====

    /// Per-process monitoring loop. Runs from Starting until the process
    /// comes to rest in Stopped, Exited, or Fatal.
    async fn monitor(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            // state is Starting on entry to each cycle
            let mut child = match spawn::spawn(&self.entry) {
                Ok(child) => child,
                Err(e) => {
                    error!(program = %self.name, error = %e, "spawn failed");
                    let gave_up = {
                        let mut rt = self.inner.lock().unwrap();
                        rt.spawn_error = Some(e.to_string());
                        rt.retries += 1;
                        self.set_state(&mut rt, ProcessState::Backoff);
                        if rt.retries > self.opts.startretries {
                            self.set_state(&mut rt, ProcessState::Fatal);
                            true
                        } else {
                            false
                        }
                    };
                    if gave_up {
                        return;
                    }
                    if !self.backoff_wait(&cancel).await {
                        return;
                    }
                    continue;
                }
            };

            let pid = child.id().unwrap_or(0);
            let stop_raced_spawn = {
                let mut rt = self.inner.lock().unwrap();
                rt.pid = Some(pid);
                rt.start_time = Some(SystemTime::now());
                rt.stdin = child.stdin.take();
                if self.opts.startsecs == 0 && rt.state == ProcessState::Starting {
                    rt.retries = 0;
                    self.set_state(&mut rt, ProcessState::Running);
                }
                rt.state == ProcessState::Stopping
            };
            if stop_raced_spawn {
                // stop() arrived before the pid was known; deliver the stop
                // signal it could not send
                let _ = signal::kill(pid, self.opts.stopsignal, self.opts.stopasgroup);
                self.spawn_kill_escalation();
            }
            info!(program = %self.name, pid, "child spawned");
            self.pump_output(&mut child, pid);

            // startsecs gate: the child must stay alive this long to count
            // as Running
            let status = if self.opts.startsecs > 0 {
                tokio::select! {
                    status = child.wait() => status,
                    _ = tokio::time::sleep(Duration::from_secs(self.opts.startsecs)) => {
                        {
                            let mut rt = self.inner.lock().unwrap();
                            if rt.state == ProcessState::Starting {
                                rt.retries = 0;
                                self.set_state(&mut rt, ProcessState::Running);
                                info!(program = %self.name, pid, "entered RUNNING");
                            }
                        }
                        child.wait().await
                    }
                }
            } else {
                child.wait().await
            };

            let exit_status = match status {
                Ok(st) => exit_code(st),
                Err(e) => {
                    error!(program = %self.name, error = %e, "wait for child failed");
                    -1
                }
            };

            enum Next {
                Rest,
                Respawn,
                Backoff,
            }

            let next = {
                let mut rt = self.inner.lock().unwrap();
                rt.pid = None;
                rt.stdin = None;
                rt.exit_status = Some(exit_status);
                rt.stop_time = Some(SystemTime::now());
                match rt.state {
                    ProcessState::Stopping => {
                        self.set_state(&mut rt, ProcessState::Stopped);
                        info!(program = %self.name, "stopped");
                        Next::Rest
                    }
                    ProcessState::Starting => {
                        rt.retries += 1;
                        warn!(
                            program = %self.name,
                            exit_status,
                            retries = rt.retries,
                            stderr = %self.stderr_tail(),
                            "exited during startup"
                        );
                        self.set_state(&mut rt, ProcessState::Backoff);
                        if rt.retries > self.opts.startretries {
                            self.set_state(&mut rt, ProcessState::Fatal);
                            error!(program = %self.name, "gave up: entering FATAL");
                            Next::Rest
                        } else {
                            Next::Backoff
                        }
                    }
                    ProcessState::Running => {
                        if self
                            .opts
                            .autorestart
                            .should_restart(exit_status, &self.opts.exitcodes)
                        {
                            info!(program = %self.name, exit_status, "exited, restarting");
                            self.set_state(&mut rt, ProcessState::Starting);
                            rt.start_time = Some(SystemTime::now());
                            Next::Respawn
                        } else {
                            info!(program = %self.name, exit_status, "exited");
                            self.set_state(&mut rt, ProcessState::Exited);
                            Next::Rest
                        }
                    }
                    other => {
                        warn!(program = %self.name, state = %other, "child exit in unexpected state");
                        Next::Rest
                    }
                }
            };

            match next {
                Next::Rest => return,
                Next::Respawn => continue,
                Next::Backoff => {
                    if !self.backoff_wait(&cancel).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep out the Backoff interval. Returns false when the wait was
    /// cancelled by stop() and the process has come to rest.
    async fn backoff_wait(&self, cancel: &CancellationToken) -> bool {
        let delay = {
            let rt = self.inner.lock().unwrap();
            backoff_delay(rt.retries, self.opts.backoff_cap)
        };
        debug!(program = %self.name, delay_secs = delay.as_secs(), "backing off");
        tokio::select! {
            _ = cancel.cancelled() => {
                let mut rt = self.inner.lock().unwrap();
                // stop() already moved the state to Stopping
                if rt.state == ProcessState::Stopping {
                    self.set_state(&mut rt, ProcessState::Stopped);
                }
                false
            }
            _ = tokio::time::sleep(delay) => {
                let mut rt = self.inner.lock().unwrap();
                if rt.state != ProcessState::Backoff {
                    return false;
                }
                self.set_state(&mut rt, ProcessState::Starting);
                rt.start_time = Some(SystemTime::now());
                true
            }
        }
    }

    /// Fan child stdout/stderr into the loggers. stderr additionally feeds
    /// the bounded in-memory tail kept for diagnostics.
    fn pump_output(&self, child: &mut tokio::process::Child, pid: u32) {
        let redirect = self.entry.get_bool("redirect_stderr", false);
        {
            self.stdout_log.lock().unwrap().set_pid(pid);
            self.stderr_log.lock().unwrap().set_pid(pid);
        }
        if let Some(stdout) = child.stdout.take() {
            spawn_pump(stdout, self.stdout_log.clone(), None);
        }
        if let Some(stderr) = child.stderr.take() {
            let target = if redirect {
                self.stdout_log.clone()
            } else {
                self.stderr_log.clone()
            };
            spawn_pump(stderr, target, Some(self.stderr_tail.clone()));
        }
    }

    /// Last captured stderr bytes, for spawn diagnostics.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr_tail.lock().unwrap()).into_owned()
    }

    /// Transition under the runtime lock, broadcasting to waiters and the
    /// event emitter. Transitions come from the lifecycle table; anything
    /// else is a bug worth logging.
    fn set_state(&self, rt: &mut Runtime, to: ProcessState) {
        let from = rt.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(program = %self.name, %from, %to, "transition outside the lifecycle table");
        }
        rt.state = to;
        // send_replace: the value must advance even while nobody subscribes
        self.state_tx.send_replace(to);

        let mut payload = HashMap::new();
        payload.insert("processname".to_string(), self.name.clone());
        payload.insert("groupname".to_string(), self.group.clone());
        payload.insert("from_state".to_string(), from.to_string());
        if let Some(pid) = rt.pid {
            payload.insert("pid".to_string(), pid.to_string());
        }
        self.events
            .emit(&format!("PROCESS_STATE_{to}"), payload);
    }
}

/// Backoff grows linearly with the retry count: the first retry is
/// immediate, each further retry adds one second, capped.
fn backoff_delay(retries: u32, cap: u64) -> Duration {
    Duration::from_secs((retries.saturating_sub(1) as u64).min(cap))
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn to_epoch(t: Option<SystemTime>) -> i64 {
    t.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn spawn_pump(
    mut src: impl AsyncReadExt + Unpin + Send + 'static,
    log: Arc<Mutex<Box<dyn Logger>>>,
    tail: Option<Arc<Mutex<Vec<u8>>>>,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match src.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Err(e) = log.lock().unwrap().write(&buf[..n]) {
                        warn!(error = %e, "log write failed");
                    }
                    if let Some(tail) = &tail {
                        let mut tail = tail.lock().unwrap();
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_CAP {
                            let excess = tail.len() - STDERR_TAIL_CAP;
                            tail.drain(..excess);
                        }
                    }
                }
            }
        }
    });
}
