//! FileWatcher port
//! Change detection for configuration files via periodic MD5 comparison

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a watched file changed between two scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Created,
    Modified,
    Deleted,
}

pub type ChangeCallback = Box<dyn Fn(&Path, FileChange) + Send + Sync>;

/// Registration surface for file-change notifications.
pub trait FileWatcher: Send + Sync {
    /// Watch files under `dir` matching the glob `pattern`.
    fn watch(&self, dir: &Path, pattern: &str, callback: ChangeCallback);
}

/// Polling watcher: scans on an interval and fires callbacks on digest
/// changes. One task per registration; stops with the supervisor token.
pub struct PollingWatcher {
    interval: Duration,
    cancel: CancellationToken,
}

impl PollingWatcher {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    fn scan(dir: &Path, pattern: &glob::Pattern) -> HashMap<PathBuf, [u8; 16]> {
        let mut digests = HashMap::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return digests;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !pattern.matches(name) {
                continue;
            }
            match std::fs::read(&path) {
                Ok(data) => {
                    let mut hasher = Md5::new();
                    hasher.update(&data);
                    digests.insert(path, hasher.finalize().into());
                }
                Err(e) => warn!(file = %path.display(), error = %e, "failed to hash file"),
            }
        }
        digests
    }
}

impl FileWatcher for PollingWatcher {
    fn watch(&self, dir: &Path, pattern: &str, callback: ChangeCallback) {
        let Ok(pattern) = glob::Pattern::new(pattern) else {
            warn!(pattern, "invalid watch pattern, ignoring registration");
            return;
        };
        let dir = dir.to_path_buf();
        let interval = self.interval;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut known = Self::scan(&dir, &pattern);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let current = Self::scan(&dir, &pattern);
                for (path, digest) in &current {
                    match known.get(path) {
                        None => {
                            debug!(file = %path.display(), "file created");
                            callback(path, FileChange::Created);
                        }
                        Some(old) if old != digest => {
                            debug!(file = %path.display(), "file modified");
                            callback(path, FileChange::Modified);
                        }
                        Some(_) => {}
                    }
                }
                for path in known.keys() {
                    if !current.contains_key(path) {
                        debug!(file = %path.display(), "file deleted");
                        callback(path, FileChange::Deleted);
                    }
                }
                known = current;
            }
        });
    }
}
