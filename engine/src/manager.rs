//! Process Manager
//! Keyed registry of processes with group membership and priority-ordered
//! bulk operations

use crate::domain::{DomainError, Result};
use crate::process::Process;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Extra slack granted to bulk stop operations beyond the largest
/// per-process stopwaitsecs.
const BULK_STOP_GRACE_SECS: u64 = 3;

/// Thread-safe registry: process name → Process, with a secondary
/// group-name index.
#[derive(Default)]
pub struct Manager {
    procs: RwLock<HashMap<String, Arc<Process>>>,
    groups: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a process. An existing process under the same name is replaced
    /// and returned; the caller must have brought it to rest first.
    pub fn add(&self, process: Arc<Process>) -> Option<Arc<Process>> {
        let name = process.name().to_string();
        let group = process.group().to_string();
        let replaced = {
            let mut procs = self.procs.write().unwrap();
            procs.insert(name.clone(), process)
        };
        {
            let mut groups = self.groups.write().unwrap();
            if let Some(old) = &replaced {
                if old.group() != group {
                    if let Some(members) = groups.get_mut(old.group()) {
                        members.remove(&name);
                    }
                }
            }
            groups.entry(group).or_default().insert(name.clone());
        }
        debug!(process = %name, "admitted to manager");
        replaced
    }

    /// Evict a process. The caller must have brought it to rest first.
    pub fn remove(&self, name: &str) -> Option<Arc<Process>> {
        let removed = {
            let mut procs = self.procs.write().unwrap();
            procs.remove(name)
        };
        if let Some(process) = &removed {
            let mut groups = self.groups.write().unwrap();
            if let Some(members) = groups.get_mut(process.group()) {
                members.remove(name);
                if members.is_empty() {
                    groups.remove(process.group());
                }
            }
            debug!(process = %name, "removed from manager");
        }
        removed
    }

    pub fn find(&self, name: &str) -> Option<Arc<Process>> {
        self.procs.read().unwrap().get(name).cloned()
    }

    /// Lookup by label with glob-style wildcards. Labels are either a bare
    /// process name pattern or the `group:name` form; `group:` alone selects
    /// the whole group.
    pub fn find_match(&self, label: &str) -> Vec<Arc<Process>> {
        let mut result = Vec::new();
        match label.split_once(':') {
            Some((group_pat, name_pat)) => {
                let group_pat = match glob::Pattern::new(group_pat) {
                    Ok(p) => p,
                    Err(_) => return result,
                };
                let name_pat = if name_pat.is_empty() { "*" } else { name_pat };
                let name_pat = match glob::Pattern::new(name_pat) {
                    Ok(p) => p,
                    Err(_) => return result,
                };
                for process in self.processes() {
                    if group_pat.matches(process.group()) && name_pat.matches(process.name()) {
                        result.push(process);
                    }
                }
            }
            None => {
                let pat = match glob::Pattern::new(label) {
                    Ok(p) => p,
                    Err(_) => return result,
                };
                for process in self.processes() {
                    if pat.matches(process.name()) {
                        result.push(process);
                    }
                }
            }
        }
        result.sort_by(|a, b| a.name().cmp(b.name()));
        result
    }

    /// Snapshot of every process, sorted by (group, name) for stable output.
    pub fn processes(&self) -> Vec<Arc<Process>> {
        let mut procs: Vec<Arc<Process>> = self.procs.read().unwrap().values().cloned().collect();
        procs.sort_by(|a, b| {
            (a.group(), a.name()).cmp(&(b.group(), b.name()))
        });
        procs
    }

    /// Visit every process without holding the registry lock during `f`.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Process>)) {
        for process in self.processes() {
            f(&process);
        }
    }

    pub fn group_members(&self, group: &str) -> Vec<Arc<Process>> {
        let names: Vec<String> = self
            .groups
            .read()
            .unwrap()
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        names.into_iter().filter_map(|n| self.find(&n)).collect()
    }

    pub fn groups(&self) -> Vec<String> {
        self.groups.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.procs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.read().unwrap().is_empty()
    }

    // ===== Bulk operations =====

    /// Start every process, priority ascending. Processes sharing a
    /// priority start concurrently; the next priority class waits.
    pub async fn start_all(&self, wait: bool) -> Result<()> {
        let procs = self.processes();
        info!(count = procs.len(), "starting all processes");
        start_in_priority_order(procs, wait).await;
        Ok(())
    }

    /// Stop every process, priority descending, bounded by the largest
    /// stopwaitsecs plus a small grace.
    pub async fn stop_all(&self, wait: bool) -> Result<()> {
        let procs = self.processes();
        info!(count = procs.len(), "stopping all processes");
        stop_in_priority_order(procs, wait).await;
        Ok(())
    }
}

/// Group processes into priority classes, ascending.
fn priority_classes(mut procs: Vec<Arc<Process>>) -> Vec<Vec<Arc<Process>>> {
    procs.sort_by(|a, b| {
        (a.priority(), a.name().to_string()).cmp(&(b.priority(), b.name().to_string()))
    });
    let mut classes: Vec<Vec<Arc<Process>>> = Vec::new();
    for process in procs {
        match classes.last_mut() {
            Some(class) if class[0].priority() == process.priority() => class.push(process),
            _ => classes.push(vec![process]),
        }
    }
    classes
}

/// Dispatch start over priority classes, lowest priority first.
pub(crate) async fn start_in_priority_order(procs: Vec<Arc<Process>>, wait: bool) {
    for class in priority_classes(procs) {
        let mut set = JoinSet::new();
        for process in class {
            set.spawn(async move {
                if let Err(e) = process.start(wait).await {
                    match e {
                        DomainError::AlreadyStarted(_) => {}
                        _ => warn!(process = %process.name(), error = %e, "start failed"),
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}
    }
}

/// Dispatch stop over priority classes, highest priority first.
pub(crate) async fn stop_in_priority_order(procs: Vec<Arc<Process>>, wait: bool) {
    let deadline = procs
        .iter()
        .map(|p| p.options().stopwaitsecs)
        .max()
        .unwrap_or(0)
        + BULK_STOP_GRACE_SECS;

    for class in priority_classes(procs).into_iter().rev() {
        let mut set = JoinSet::new();
        for process in class {
            set.spawn(async move {
                let stop = process.stop(wait);
                match tokio::time::timeout(std::time::Duration::from_secs(deadline), stop).await {
                    Ok(Err(DomainError::NotRunning(_))) | Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(process = %process.name(), error = %e, "stop failed"),
                    Err(_) => warn!(process = %process.name(), "stop deadline exceeded"),
                }
            });
        }
        while set.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Entry;
    use crate::domain::ProcessState;
    use crate::ports::NoopEmitter;
    use std::path::Path;

    fn test_process(name: &str, group: &str, pairs: &[(&str, &str)]) -> Arc<Process> {
        let mut entry = Entry::new(Path::new("/tmp"));
        entry.name = format!("program:{name}");
        entry.group = group.to_string();
        entry.set("command", "/bin/sleep 30");
        entry.set("startsecs", "0");
        for (k, v) in pairs {
            entry.set(k, v);
        }
        Process::from_entry(entry, Arc::new(NoopEmitter))
    }

    #[test]
    fn test_add_find_remove() {
        let manager = Manager::new();
        manager.add(test_process("web", "web", &[]));
        assert!(manager.find("web").is_some());
        assert!(manager.find("worker").is_none());
        assert_eq!(manager.len(), 1);

        manager.remove("web");
        assert!(manager.find("web").is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_add_replaces_same_name() {
        let manager = Manager::new();
        manager.add(test_process("web", "web", &[]));
        let replaced = manager.add(test_process("web", "backend", &[]));
        assert!(replaced.is_some());
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.find("web").unwrap().group(), "backend");
        // group index follows the replacement
        assert!(manager.group_members("web").is_empty());
        assert_eq!(manager.group_members("backend").len(), 1);
    }

    #[test]
    fn test_group_index() {
        let manager = Manager::new();
        manager.add(test_process("web", "backend", &[]));
        manager.add(test_process("worker", "backend", &[]));
        manager.add(test_process("cron", "cron", &[]));

        let members = manager.group_members("backend");
        let names: Vec<&str> = members.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["web", "worker"]);
        assert_eq!(manager.groups(), vec!["backend", "cron"]);
    }

    #[test]
    fn test_find_match_bare_name() {
        let manager = Manager::new();
        manager.add(test_process("web_0", "web", &[]));
        manager.add(test_process("web_1", "web", &[]));
        manager.add(test_process("cron", "cron", &[]));

        let matched = manager.find_match("web_*");
        let names: Vec<&str> = matched.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["web_0", "web_1"]);

        assert_eq!(manager.find_match("cron").len(), 1);
        assert!(manager.find_match("nope").is_empty());
    }

    #[test]
    fn test_find_match_group_form() {
        let manager = Manager::new();
        manager.add(test_process("web", "backend", &[]));
        manager.add(test_process("worker", "backend", &[]));
        manager.add(test_process("cron", "cron", &[]));

        let matched = manager.find_match("backend:*");
        assert_eq!(matched.len(), 2);

        let matched = manager.find_match("backend:web");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name(), "web");

        // trailing colon selects the whole group
        let matched = manager.find_match("backend:");
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_priority_classes() {
        let p10 = test_process("b", "g", &[("priority", "10")]);
        let p10b = test_process("a", "g", &[("priority", "10")]);
        let p20 = test_process("c", "g", &[("priority", "20")]);
        let classes = priority_classes(vec![p20.clone(), p10.clone(), p10b.clone()]);
        assert_eq!(classes.len(), 2);
        let first: Vec<&str> = classes[0].iter().map(|p| p.name()).collect();
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(classes[1][0].name(), "c");
    }

    #[tokio::test]
    async fn test_start_all_and_stop_all() {
        let manager = Manager::new();
        manager.add(test_process("one", "g", &[]));
        manager.add(test_process("two", "g", &[]));

        manager.start_all(true).await.unwrap();
        manager.for_each(|p| assert_eq!(p.state(), ProcessState::Running));

        manager.stop_all(true).await.unwrap();
        manager.for_each(|p| assert_eq!(p.state(), ProcessState::Stopped));
    }
}
