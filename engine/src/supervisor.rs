//! Supervisor facade
//!
//! Owns the configuration snapshot and the process manager, and exports the
//! operation surface consumed by the HTTP adapter and the control client.
//! Errors are `DomainError`s; adapters map them onto numeric fault codes.

use crate::config::{Config, ConfigDiff, Entry};
use crate::domain::{signal, DomainError, Result};
use crate::manager::{start_in_priority_order, stop_in_priority_order, Manager};
use crate::ports::EventEmitter;
use crate::process::{Process, ProcessInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Supervisor-level state reported by `get_state`.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorState {
    pub statecode: i32,
    pub statename: String,
}

pub struct Supervisor {
    config_file: PathBuf,
    config: RwLock<Config>,
    manager: Arc<Manager>,
    events: Arc<dyn EventEmitter>,
    reload_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(config_file: &Path, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            config_file: config_file.to_path_buf(),
            config: RwLock::new(Config::new(config_file)),
            manager: Arc::new(Manager::new()),
            events,
            reload_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn events(&self) -> &Arc<dyn EventEmitter> {
        &self.events
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Read a value from the current `[supervisord]` section.
    pub fn supervisord_setting(&self, key: &str, default: &str) -> String {
        self.config
            .read()
            .unwrap()
            .supervisord()
            .map(|e| e.get_string(key, default))
            .unwrap_or_else(|| default.to_string())
    }

    /// Snapshot of a server section (`inet_http_server` / `unix_http_server`).
    pub fn server_entry(&self, section: &str) -> Option<Entry> {
        self.config.read().unwrap().entry(section).cloned()
    }

    // ===== Supervisor-level operations =====

    pub fn get_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn get_identification(&self) -> String {
        self.supervisord_setting("identifier", "supervisor")
    }

    pub fn get_state(&self) -> SupervisorState {
        let (code, name) = if self.shutdown.is_cancelled() {
            (-1, "SHUTDOWN")
        } else {
            (1, "RUNNING")
        };
        SupervisorState {
            statecode: code,
            statename: name.to_string(),
        }
    }

    pub fn get_pid(&self) -> u32 {
        std::process::id()
    }

    /// Read from the supervisor's own log file.
    pub fn read_log(&self, offset: i64, length: i64) -> Result<String> {
        let logfile = self.supervisord_setting("logfile", "");
        if logfile.is_empty() || !Path::new(&logfile).is_file() {
            return Err(DomainError::NoFile);
        }
        let mut logger = crate::ports::FileLogger::new(PathBuf::from(logfile), 0, 0);
        crate::ports::Logger::read_log(&mut logger, offset, length)
    }

    pub fn clear_log(&self) -> Result<()> {
        let logfile = self.supervisord_setting("logfile", "");
        if logfile.is_empty() {
            return Err(DomainError::NoFile);
        }
        std::fs::write(&logfile, b"").map_err(|e| DomainError::Failed(e.to_string()))
    }

    /// Stop everything and flag the daemon for exit.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutdown requested");
        self.manager.stop_all(true).await?;
        self.shutdown.cancel();
        Ok(())
    }

    /// Stop everything, then bring autostart programs back up.
    pub async fn restart(&self) -> Result<()> {
        info!("restart requested");
        self.manager.stop_all(true).await?;
        self.autostart().await;
        Ok(())
    }

    // ===== Process queries =====

    pub fn get_process_info(&self, name: &str) -> Result<ProcessInfo> {
        self.manager
            .find(name)
            .map(|p| p.info())
            .ok_or_else(|| DomainError::BadName(name.to_string()))
    }

    pub fn get_all_process_info(&self) -> Vec<ProcessInfo> {
        self.manager.processes().iter().map(|p| p.info()).collect()
    }

    // ===== Process commands =====

    /// Start by name or `group:name` label; wildcards supported.
    pub async fn start_process(&self, label: &str, wait: bool) -> Result<()> {
        let procs = self.named(label)?;
        if procs.len() == 1 {
            return procs[0].start(wait).await;
        }
        start_in_priority_order(procs, wait).await;
        Ok(())
    }

    /// Stop by name or `group:name` label; wildcards supported.
    pub async fn stop_process(&self, label: &str, wait: bool) -> Result<()> {
        let procs = self.named(label)?;
        if procs.len() == 1 {
            return procs[0].stop(wait).await;
        }
        stop_in_priority_order(procs, wait).await;
        Ok(())
    }

    pub async fn start_process_group(&self, group: &str, wait: bool) -> Result<Vec<String>> {
        let procs = self.group(group)?;
        let names = procs.iter().map(|p| p.name().to_string()).collect();
        start_in_priority_order(procs, wait).await;
        Ok(names)
    }

    pub async fn stop_process_group(&self, group: &str, wait: bool) -> Result<Vec<String>> {
        let procs = self.group(group)?;
        let names = procs.iter().map(|p| p.name().to_string()).collect();
        stop_in_priority_order(procs, wait).await;
        Ok(names)
    }

    pub async fn start_all_processes(&self, wait: bool) -> Result<()> {
        self.manager.start_all(wait).await
    }

    pub async fn stop_all_processes(&self, wait: bool) -> Result<()> {
        self.manager.stop_all(wait).await
    }

    pub fn signal_process(&self, label: &str, signame: &str) -> Result<()> {
        let sig = signal::to_signal(signame)?;
        let procs = self.named(label)?;
        for process in procs {
            process.signal(sig)?;
        }
        Ok(())
    }

    pub fn signal_process_group(&self, group: &str, signame: &str) -> Result<()> {
        let sig = signal::to_signal(signame)?;
        for process in self.group(group)? {
            if let Err(e) = process.signal(sig) {
                warn!(process = %process.name(), error = %e, "signal failed");
            }
        }
        Ok(())
    }

    pub fn signal_all_processes(&self, signame: &str) -> Result<()> {
        let sig = signal::to_signal(signame)?;
        self.manager.for_each(|p| {
            if let Err(e) = p.signal(sig) {
                warn!(process = %p.name(), error = %e, "signal failed");
            }
        });
        Ok(())
    }

    pub async fn send_process_stdin(&self, name: &str, chars: &str) -> Result<()> {
        let process = self
            .manager
            .find(name)
            .ok_or_else(|| DomainError::BadName(name.to_string()))?;
        process.send_stdin(chars).await
    }

    pub fn send_remote_comm_event(&self, kind: &str, data: &str) {
        let mut payload = HashMap::new();
        payload.insert("type".to_string(), kind.to_string());
        payload.insert("data".to_string(), data.to_string());
        self.events.emit("REMOTE_COMMUNICATION", payload);
    }

    // ===== Configuration lifecycle =====

    /// Initial load: a reload against the empty snapshot. Autostart entries
    /// come up in priority order as part of reconciliation.
    pub async fn load(&self) -> Result<ConfigDiff> {
        self.reload_config().await
    }

    /// Three-way reconciliation against a freshly loaded snapshot. Serialized:
    /// a concurrent reload is rejected with IncorrectState. A load failure
    /// leaves the prior config in place.
    pub async fn reload_config(&self) -> Result<ConfigDiff> {
        let _guard = self
            .reload_lock
            .try_lock()
            .map_err(|_| DomainError::IncorrectState("reload already in progress".to_string()))?;

        let mut fresh = Config::new(&self.config_file);
        if let Err(e) = fresh.load() {
            error!(error = %e, "configuration reload failed, keeping previous config");
            return Err(DomainError::CantReread(e.to_string()));
        }

        let diff = self.config.read().unwrap().diff(&fresh);
        info!(
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            "configuration diff computed"
        );

        // removed and changed processes are stopped and evicted first
        for name in diff.removed.iter().chain(diff.changed.iter()) {
            if let Some(process) = self.manager.find(name) {
                if let Err(e) = process.stop(true).await {
                    match e {
                        DomainError::NotRunning(_) => {}
                        _ => warn!(process = %name, error = %e, "stop during reload failed"),
                    }
                }
                self.manager.remove(name);
            }
        }

        *self.config.write().unwrap() = fresh;

        // added and changed processes are built from the new snapshot
        {
            let config = self.config.read().unwrap();
            for name in diff.added.iter().chain(diff.changed.iter()) {
                match config.program(name) {
                    Some(entry) => {
                        let process = Process::from_entry(entry.clone(), self.events.clone());
                        self.manager.add(process);
                    }
                    None => warn!(process = %name, "diffed entry vanished from snapshot"),
                }
            }
        }

        // new and changed autostart programs come up immediately
        let to_start: Vec<Arc<Process>> = diff
            .added
            .iter()
            .chain(diff.changed.iter())
            .filter_map(|name| self.manager.find(name))
            .filter(|p| p.options().autostart)
            .collect();
        start_in_priority_order(to_start, false).await;

        Ok(diff)
    }

    /// Admit the program group `name` from the current configuration.
    pub async fn add_process_group(&self, name: &str) -> Result<Vec<String>> {
        let entries: Vec<Entry> = {
            let config = self.config.read().unwrap();
            config
                .programs()
                .into_iter()
                .filter(|e| {
                    e.group == name || (e.group.is_empty() && e.program_name() == name)
                })
                .cloned()
                .collect()
        };
        if entries.is_empty() {
            return Err(DomainError::BadName(name.to_string()));
        }
        if entries
            .iter()
            .all(|e| self.manager.find(e.program_name()).is_some())
        {
            return Err(DomainError::AlreadyAdded(name.to_string()));
        }

        let mut added = Vec::new();
        let mut to_start = Vec::new();
        for entry in entries {
            if self.manager.find(entry.program_name()).is_some() {
                continue;
            }
            let process = Process::from_entry(entry, self.events.clone());
            added.push(process.name().to_string());
            if process.options().autostart {
                to_start.push(process.clone());
            }
            self.manager.add(process);
        }
        start_in_priority_order(to_start, false).await;
        Ok(added)
    }

    /// Evict the program group `name`. Every member must be at rest.
    pub fn remove_process_group(&self, name: &str) -> Result<Vec<String>> {
        let members = self.manager.group_members(name);
        if members.is_empty() {
            return Err(DomainError::BadName(name.to_string()));
        }
        if members.iter().any(|p| !p.state().is_terminal()) {
            return Err(DomainError::StillRunning(name.to_string()));
        }
        let mut removed = Vec::new();
        for process in members {
            self.manager.remove(process.name());
            removed.push(process.name().to_string());
        }
        Ok(removed)
    }

    // ===== Process log operations =====

    pub fn read_process_stdout_log(&self, name: &str, offset: i64, length: i64) -> Result<String> {
        let process = self.named_one(name)?;
        let logger = process.stdout_logger();
        let mut logger = logger.lock().unwrap();
        logger.read_log(offset, length)
    }

    pub fn read_process_stderr_log(&self, name: &str, offset: i64, length: i64) -> Result<String> {
        let process = self.named_one(name)?;
        let logger = process.stderr_logger();
        let mut logger = logger.lock().unwrap();
        logger.read_log(offset, length)
    }

    pub fn tail_process_stdout_log(
        &self,
        name: &str,
        offset: i64,
        length: i64,
    ) -> Result<(String, i64, bool)> {
        let process = self.named_one(name)?;
        let logger = process.stdout_logger();
        let mut logger = logger.lock().unwrap();
        logger.read_tail_log(offset, length)
    }

    pub fn tail_process_stderr_log(
        &self,
        name: &str,
        offset: i64,
        length: i64,
    ) -> Result<(String, i64, bool)> {
        let process = self.named_one(name)?;
        let logger = process.stderr_logger();
        let mut logger = logger.lock().unwrap();
        logger.read_tail_log(offset, length)
    }

    pub fn clear_process_logs(&self, name: &str) -> Result<()> {
        let process = self.named_one(name)?;
        {
            let logger = process.stdout_logger();
            let mut logger = logger.lock().unwrap();
            logger.clear_all()?;
        }
        let logger = process.stderr_logger();
        let mut logger = logger.lock().unwrap();
        logger.clear_all()
    }

    pub fn clear_all_process_logs(&self) -> Result<()> {
        self.manager.for_each(|p| {
            for logger in [p.stdout_logger(), p.stderr_logger()] {
                let mut logger = logger.lock().unwrap();
                if let Err(e) = logger.clear_all() {
                    match e {
                        DomainError::NoFile => {}
                        _ => warn!(process = %p.name(), error = %e, "clear log failed"),
                    }
                }
            }
        });
        Ok(())
    }

    // ===== Helpers =====

    async fn autostart(&self) {
        let to_start: Vec<Arc<Process>> = self
            .manager
            .processes()
            .into_iter()
            .filter(|p| p.options().autostart && p.state().can_start())
            .collect();
        info!(count = to_start.len(), "starting autostart programs");
        start_in_priority_order(to_start, false).await;
    }

    fn named(&self, label: &str) -> Result<Vec<Arc<Process>>> {
        let procs = self.manager.find_match(label);
        if procs.is_empty() {
            return Err(DomainError::BadName(label.to_string()));
        }
        Ok(procs)
    }

    fn group(&self, group: &str) -> Result<Vec<Arc<Process>>> {
        let procs = self.manager.group_members(group);
        if procs.is_empty() {
            return Err(DomainError::BadName(group.to_string()));
        }
        Ok(procs)
    }

    fn named_one(&self, name: &str) -> Result<Arc<Process>> {
        self.manager
            .find(name)
            .ok_or_else(|| DomainError::BadName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NoopEmitter;
    use std::io::Write;

    fn write_config(path: &Path, text: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn supervisor(path: &Path) -> Supervisor {
        Supervisor::new(path, Arc::new(NoopEmitter))
    }

    #[tokio::test]
    async fn test_load_admits_programs() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("supervisord.conf");
        write_config(
            &conf,
            "[program:a]\ncommand=/bin/sleep 30\nstartsecs=0\nautostart=false\n",
        );
        let sup = supervisor(&conf);
        let diff = sup.load().await.unwrap();
        assert_eq!(diff.added, vec!["a"]);
        assert_eq!(sup.manager().len(), 1);
        assert_eq!(sup.get_process_info("a").unwrap().statename, "STOPPED");
    }

    #[tokio::test]
    async fn test_reload_identical_is_empty_diff() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("supervisord.conf");
        write_config(
            &conf,
            "[program:a]\ncommand=/bin/sleep 30\nautostart=false\n",
        );
        let sup = supervisor(&conf);
        sup.load().await.unwrap();
        let diff = sup.reload_config().await.unwrap();
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_reload_failure_preserves_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("supervisord.conf");
        write_config(
            &conf,
            "[program:a]\ncommand=/bin/sleep 30\nautostart=false\n",
        );
        let sup = supervisor(&conf);
        sup.load().await.unwrap();

        // numprocs > 1 without %(process_num) is invalid
        write_config(&conf, "[program:a]\ncommand=/bin/sleep 30\nnumprocs=2\n");
        let err = sup.reload_config().await.unwrap_err();
        assert!(matches!(err, DomainError::CantReread(_)));
        // previous process set is untouched
        assert!(sup.manager().find("a").is_some());
    }

    #[tokio::test]
    async fn test_unknown_name_is_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("supervisord.conf");
        write_config(&conf, "[supervisord]\nidentifier=test\n");
        let sup = supervisor(&conf);
        sup.load().await.unwrap();

        assert!(matches!(
            sup.start_process("ghost", false).await,
            Err(DomainError::BadName(_))
        ));
        assert!(matches!(
            sup.get_process_info("ghost"),
            Err(DomainError::BadName(_))
        ));
    }

    #[tokio::test]
    async fn test_signal_unknown_signal_is_bad_signal() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("supervisord.conf");
        write_config(
            &conf,
            "[program:a]\ncommand=/bin/sleep 30\nautostart=false\n",
        );
        let sup = supervisor(&conf);
        sup.load().await.unwrap();
        assert!(matches!(
            sup.signal_process("a", "SIGWHATEVER"),
            Err(DomainError::BadSignal(_))
        ));
    }

    #[tokio::test]
    async fn test_identification_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("supervisord.conf");
        write_config(&conf, "[supervisord]\nidentifier=prod-visor\n");
        let sup = supervisor(&conf);
        sup.load().await.unwrap();
        assert_eq!(sup.get_identification(), "prod-visor");
        assert_eq!(sup.get_state().statename, "RUNNING");
        assert!(sup.get_pid() > 0);
    }

    #[tokio::test]
    async fn test_remove_process_group_requires_rest() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("supervisord.conf");
        write_config(
            &conf,
            "[program:a]\ncommand=/bin/sleep 30\nstartsecs=0\nautostart=true\n",
        );
        let sup = supervisor(&conf);
        sup.load().await.unwrap();
        // wait for autostart to land
        let process = sup.manager().find("a").unwrap();
        let mut rx = process.subscribe();
        rx.wait_for(|s| *s == crate::domain::ProcessState::Running)
            .await
            .unwrap();

        assert!(matches!(
            sup.remove_process_group("a"),
            Err(DomainError::StillRunning(_))
        ));
        sup.stop_process("a", true).await.unwrap();
        assert_eq!(sup.remove_process_group("a").unwrap(), vec!["a"]);
        assert!(sup.manager().is_empty());
    }
}
