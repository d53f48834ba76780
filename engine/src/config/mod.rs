//! Configuration model
//! INI loading, include resolution, template expansion, and snapshot diffing

mod entry;
mod expression;
mod group;
mod ini;

pub use entry::{parse_env, Entry};
pub use expression::StringExpression;
pub use group::ProcessGroup;
pub use ini::{Ini, Section};

use crate::domain::{DomainError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Immutable configuration snapshot.
///
/// Program and eventlistener sections are stored fully expanded: one entry
/// per process instance, keyed by the section name with the expanded process
/// name (`program:web_01`).
#[derive(Debug, Clone, Default)]
pub struct Config {
    config_file: PathBuf,
    entries: BTreeMap<String, Entry>,
    pub program_group: ProcessGroup,
}

/// Result of comparing two configuration snapshots, program entries only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

impl Config {
    pub fn new(config_file: &Path) -> Self {
        Self {
            config_file: config_file.to_path_buf(),
            entries: BTreeMap::new(),
            program_group: ProcessGroup::new(),
        }
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Load the configuration file, resolve includes, apply program defaults,
    /// and expand programs. Returns the expanded process names.
    pub fn load(&mut self) -> Result<Vec<String>> {
        info!(file = %self.config_file.display(), "loading configuration");
        let mut ini = Ini::new();
        ini.load_file(&self.config_file)?;

        for file in self.include_files(&ini)? {
            info!(file = %file.display(), "loading included configuration");
            ini.load_file(&file)?;
        }

        self.entries.clear();
        self.program_group = ProcessGroup::new();

        apply_program_defaults(&mut ini);
        self.parse_groups(&ini);
        let loaded = self.parse_programs(&ini)?;

        // remaining sections are stored verbatim
        for section in ini.sections() {
            if section.name.starts_with("group:")
                || section.name.starts_with("program:")
                || section.name.starts_with("eventlistener:")
                || section.name == "program-default"
            {
                continue;
            }
            let mut entry = Entry::new(&self.config_dir());
            entry.name = section.name.clone();
            for (k, v) in section.keys() {
                entry.set(k, v);
            }
            self.entries.insert(section.name.clone(), entry);
        }

        Ok(loaded)
    }

    /// Expand the `[include] files` globs relative to the config directory.
    fn include_files(&self, ini: &Ini) -> Result<Vec<PathBuf>> {
        let Some(section) = ini.section("include") else {
            return Ok(Vec::new());
        };
        let Some(files) = section.get("files") else {
            return Ok(Vec::new());
        };

        let here = self.config_dir();
        let env = StringExpression::new().add("here", &here.to_string_lossy());
        let mut result = Vec::new();
        for pattern in files.split_whitespace() {
            let pattern = env.eval(pattern)?;
            let full = if Path::new(&pattern).is_absolute() {
                pattern
            } else {
                here.join(&pattern).to_string_lossy().into_owned()
            };
            match glob::glob(&full) {
                Ok(paths) => {
                    for path in paths.flatten() {
                        if path.is_file() {
                            result.push(path);
                        }
                    }
                }
                Err(e) => {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "bad include pattern '{full}': {e}"
                    )))
                }
            }
        }
        result.sort();
        Ok(result)
    }

    fn parse_groups(&mut self, ini: &Ini) {
        for section in ini.sections() {
            let Some(group_name) = section.name.strip_prefix("group:") else {
                continue;
            };
            let mut entry = Entry::new(&self.config_dir());
            entry.name = section.name.clone();
            for (k, v) in section.keys() {
                entry.set(k, v);
            }
            for program in entry.group_programs() {
                self.program_group.add(group_name, &program);
            }
            self.entries.insert(section.name.clone(), entry);
        }
    }

    /// Expand `[program:x]` and `[eventlistener:x]` sections, one entry per
    /// instance. `numprocs > 1` requires `%(process_num)` in `process_name`.
    fn parse_programs(&mut self, ini: &Ini) -> Result<Vec<String>> {
        let mut loaded = Vec::new();

        for section in ini.sections() {
            let (prefix, program_name) = if let Some(n) = section.name.strip_prefix("program:") {
                ("program:", n)
            } else if let Some(n) = section.name.strip_prefix("eventlistener:") {
                ("eventlistener:", n)
            } else {
                continue;
            };

            let numprocs: i64 = section
                .get("numprocs")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1)
                .max(1);
            let numprocs_start: i64 = section
                .get("numprocs_start")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let name_template = section
                .get("process_name")
                .unwrap_or(program_name)
                .to_string();
            let command_template = section.get("command").unwrap_or_default().to_string();
            if command_template.is_empty() {
                return Err(DomainError::InvalidConfiguration(format!(
                    "[{}{}] is missing the required 'command' key",
                    prefix, program_name
                )));
            }
            if numprocs > 1 && !name_template.contains("%(process_num)") {
                return Err(DomainError::InvalidConfiguration(format!(
                    "[{}{}] has numprocs={} but process_name does not contain %(process_num)",
                    prefix, program_name, numprocs
                )));
            }

            let group = self
                .program_group
                .group_of(program_name, program_name);

            for i in 0..numprocs {
                let process_num = numprocs_start + i;
                let mut env = StringExpression::new()
                    .add("program_name", program_name)
                    .add("process_num", &process_num.to_string())
                    .add("group_name", &group)
                    .add("here", &self.config_dir().to_string_lossy());
                for (k, v) in parse_env(section.get("environment").unwrap_or_default()) {
                    env = env.add(&format!("ENV_{k}"), &v);
                }

                let command = env.eval(&command_template)?;
                let process_name = env.eval(&name_template)?;

                let mut entry = Entry::new(&self.config_dir());
                entry.name = format!("{prefix}{process_name}");
                entry.group = group.clone();
                for (k, v) in section.keys() {
                    entry.set(k, v);
                }
                entry.set("command", &command);
                entry.set("process_name", &process_name);
                entry.set("process_num", &process_num.to_string());
                entry.set("numprocs_start", &numprocs_start.to_string());

                if self.entries.contains_key(&entry.name) {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "duplicate process name '{process_name}'"
                    )));
                }
                self.entries.insert(entry.name.clone(), entry);
                loaded.push(process_name);
            }
        }

        Ok(loaded)
    }

    // ===== Lookup =====

    pub fn entry(&self, section_name: &str) -> Option<&Entry> {
        self.entries.get(section_name)
    }

    pub fn supervisord(&self) -> Option<&Entry> {
        self.entries.get("supervisord")
    }

    pub fn inet_http_server(&self) -> Option<&Entry> {
        self.entries.get("inet_http_server")
    }

    pub fn unix_http_server(&self) -> Option<&Entry> {
        self.entries.get("unix_http_server")
    }

    /// Expanded program and eventlistener entries, priority order
    /// (ascending, ties by name).
    pub fn programs(&self) -> Vec<&Entry> {
        let mut programs: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.is_program() || e.is_event_listener())
            .collect();
        programs.sort_by_key(|e| (e.get_int("priority", 999), e.program_name().to_string()));
        programs
    }

    pub fn program(&self, process_name: &str) -> Option<&Entry> {
        self.programs()
            .into_iter()
            .find(|e| e.program_name() == process_name)
    }

    /// Three-way diff against a newer snapshot, keyed by expanded process
    /// name and compared by canonical serialization.
    pub fn diff(&self, newer: &Config) -> ConfigDiff {
        let old: BTreeMap<&str, &Entry> = self
            .programs()
            .into_iter()
            .map(|e| (e.program_name(), e))
            .collect();
        let new: BTreeMap<&str, &Entry> = newer
            .programs()
            .into_iter()
            .map(|e| (e.program_name(), e))
            .collect();

        let mut diff = ConfigDiff::default();
        for (name, entry) in &new {
            match old.get(name) {
                None => diff.added.push(name.to_string()),
                Some(prev) if prev.serialize() != entry.serialize() => {
                    diff.changed.push(name.to_string())
                }
                Some(_) => {}
            }
        }
        for name in old.keys() {
            if !new.contains_key(name) {
                diff.removed.push(name.to_string());
            }
        }
        diff
    }
}

/// Copy `[program-default]` keys into every program section that lacks them.
fn apply_program_defaults(ini: &mut Ini) {
    let defaults: Vec<(String, String)> = match ini.section("program-default") {
        Some(section) => section
            .keys()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        None => return,
    };
    for section in ini.sections_mut() {
        if !section.name.starts_with("program:") && !section.name.starts_with("eventlistener:") {
            continue;
        }
        for (k, v) in &defaults {
            if !section.has_key(k) {
                section.set(k, v);
            }
        }
    }
}

/// Well-known locations probed when no `-c` flag is given.
pub fn find_config_file() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = vec![
        PathBuf::from("./supervisord.ini"),
        PathBuf::from("./etc/supervisord.conf"),
        PathBuf::from("/etc/supervisord.conf"),
        PathBuf::from("/etc/supervisor/supervisord.conf"),
    ];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("../etc/supervisord.conf"));
            candidates.push(dir.join("../supervisord.conf"));
        }
    }
    candidates.push(PathBuf::from("./supervisord.conf"));

    for candidate in candidates {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    warn!("no configuration file found in the default search locations");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        path
    }

    fn load(dir: &Path, text: &str) -> Config {
        let path = write_config(dir, "supervisord.conf", text);
        let mut config = Config::new(&path);
        config.load().unwrap();
        config
    }

    #[test]
    fn test_single_program() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[program:web]\ncommand=/bin/sleep 60\nautostart=true\n",
        );
        let programs = config.programs();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].program_name(), "web");
        assert_eq!(programs[0].group, "web");
        assert_eq!(programs[0].get_string("command", ""), "/bin/sleep 60");
    }

    #[test]
    fn test_numprocs_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[program:worker]\ncommand=/bin/sleep %(process_num)d\nnumprocs=3\nprocess_name=worker_%(process_num)02d\n",
        );
        let names: Vec<&str> = config.programs().iter().map(|e| e.program_name()).collect();
        assert_eq!(names, vec!["worker_00", "worker_01", "worker_02"]);
        assert_eq!(
            config.program("worker_01").unwrap().get_string("command", ""),
            "/bin/sleep 1"
        );
    }

    #[test]
    fn test_numprocs_start_offset() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[program:w]\ncommand=/bin/true\nnumprocs=2\nnumprocs_start=5\nprocess_name=w_%(process_num)d\n",
        );
        let names: Vec<&str> = config.programs().iter().map(|e| e.program_name()).collect();
        assert_eq!(names, vec!["w_5", "w_6"]);
    }

    #[test]
    fn test_numprocs_without_placeholder_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "supervisord.conf",
            "[program:w]\ncommand=/bin/true\nnumprocs=2\n",
        );
        let mut config = Config::new(&path);
        assert!(matches!(
            config.load(),
            Err(DomainError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_numprocs_one_without_placeholder_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(dir.path(), "[program:w]\ncommand=/bin/true\nnumprocs=1\n");
        assert_eq!(config.programs()[0].program_name(), "w");
    }

    #[test]
    fn test_missing_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "supervisord.conf", "[program:w]\nautostart=true\n");
        let mut config = Config::new(&path);
        assert!(config.load().is_err());
    }

    #[test]
    fn test_group_membership() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[group:backend]\nprograms=web,worker\n\n[program:web]\ncommand=/bin/true\n\n[program:worker]\ncommand=/bin/true\n\n[program:cron]\ncommand=/bin/true\n",
        );
        assert_eq!(config.program("web").unwrap().group, "backend");
        assert_eq!(config.program("worker").unwrap().group, "backend");
        assert_eq!(config.program("cron").unwrap().group, "cron");
    }

    #[test]
    fn test_program_default_inheritance() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[program-default]\nautostart=false\nstartretries=9\n\n[program:web]\ncommand=/bin/true\nautostart=true\n",
        );
        let web = config.program("web").unwrap();
        // explicit key wins, missing key inherited
        assert!(web.get_bool("autostart", false));
        assert_eq!(web.get_int("startretries", 3), 9);
    }

    #[test]
    fn test_include_files() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "web.conf", "[program:web]\ncommand=/bin/true\n");
        write_config(dir.path(), "worker.conf", "[program:worker]\ncommand=/bin/true\n");
        let config = load(
            dir.path(),
            "[supervisord]\nloglevel=info\n\n[include]\nfiles = %(here)s/*.conf\n",
        );
        let names: Vec<&str> = config.programs().iter().map(|e| e.program_name()).collect();
        assert_eq!(names, vec!["web", "worker"]);
    }

    #[test]
    fn test_command_templating_with_env() {
        std::env::set_var("VISOR_CONF_TEST_DIR", "/data");
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[program:w]\ncommand=/bin/ls %(ENV_VISOR_CONF_TEST_DIR)s\n",
        );
        assert_eq!(
            config.program("w").unwrap().get_string("command", ""),
            "/bin/ls /data"
        );
    }

    #[test]
    fn test_unknown_template_var_is_loader_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "supervisord.conf",
            "[program:w]\ncommand=/bin/ls %(nope)s\n",
        );
        let mut config = Config::new(&path);
        assert!(matches!(config.load(), Err(DomainError::EnvVarNotFound(_))));
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let text = "[program:a]\ncommand=/bin/true\n\n[program:b]\ncommand=/bin/false\n";
        let c0 = load(dir.path(), text);
        let c1 = load(dir.path(), text);
        assert!(c0.diff(&c1).is_empty());
    }

    #[test]
    fn test_diff_added_changed_removed() {
        let dir = tempfile::tempdir().unwrap();
        let c0 = load(
            dir.path(),
            "[program:a]\ncommand=/bin/true\n\n[program:b]\ncommand=/bin/false\n",
        );
        let c1 = load(
            dir.path(),
            "[program:a]\ncommand=/bin/sleep 1\n\n[program:c]\ncommand=/bin/true\n",
        );
        let diff = c0.diff(&c1);
        assert_eq!(diff.added, vec!["c"]);
        assert_eq!(diff.changed, vec!["a"]);
        assert_eq!(diff.removed, vec!["b"]);
    }

    #[test]
    fn test_priority_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[program:z]\ncommand=/bin/true\npriority=10\n\n[program:a]\ncommand=/bin/true\npriority=20\n\n[program:m]\ncommand=/bin/true\npriority=10\n",
        );
        let names: Vec<&str> = config.programs().iter().map(|e| e.program_name()).collect();
        // priority ascending, ties by name
        assert_eq!(names, vec!["m", "z", "a"]);
    }

    #[test]
    fn test_eventlistener_expanded_like_program() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(
            dir.path(),
            "[eventlistener:mem]\ncommand=/bin/cat\nevents=PROCESS_STATE\n",
        );
        let programs = config.programs();
        assert_eq!(programs.len(), 1);
        assert!(programs[0].is_event_listener());
        assert_eq!(programs[0].program_name(), "mem");
    }
}
