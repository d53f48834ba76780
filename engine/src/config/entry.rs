//! ConfigEntry
//! A named configuration section with typed, template-aware accessors

use crate::config::expression::StringExpression;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One configuration section: a name, the group it belongs to, and its
/// key/value map. Sorted storage gives a canonical serialization used by the
/// reload diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub config_dir: PathBuf,
    pub group: String,
    pub name: String,
    key_values: BTreeMap<String, String>,
}

impl Entry {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            group: String::new(),
            name: String::new(),
            key_values: BTreeMap::new(),
        }
    }

    // ===== Section classification =====

    pub fn is_program(&self) -> bool {
        self.name.starts_with("program:")
    }

    pub fn is_event_listener(&self) -> bool {
        self.name.starts_with("eventlistener:")
    }

    pub fn is_group(&self) -> bool {
        self.name.starts_with("group:")
    }

    /// Expanded process name for program and eventlistener sections.
    pub fn program_name(&self) -> &str {
        self.name
            .strip_prefix("program:")
            .or_else(|| self.name.strip_prefix("eventlistener:"))
            .unwrap_or("")
    }

    pub fn group_section_name(&self) -> &str {
        self.name.strip_prefix("group:").unwrap_or("")
    }

    /// Programs listed in a `[group:x]` section.
    pub fn group_programs(&self) -> Vec<String> {
        if !self.is_group() {
            return Vec::new();
        }
        self.get_string_array("programs", ",")
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    // ===== Raw access =====

    pub fn has_key(&self, key: &str) -> bool {
        self.key_values.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.key_values
            .insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.key_values.get(key).map(|v| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.key_values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical serialization: sorted `key=value` lines. Two entries with
    /// the same serialization configure the same process.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.key_values {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    // ===== Typed accessors =====

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.key_values.get(key).map(|v| v.to_lowercase()) {
            Some(v) => match v.as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => default,
            },
            None => default,
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.key_values
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Byte sizes: plain integer or `KB` / `MB` / `GB` suffix (powers of 1024).
    pub fn get_bytes(&self, key: &str, default: i64) -> i64 {
        let Some(v) = self.key_values.get(key) else {
            return default;
        };
        let v = v.trim();
        let (digits, factor) = if let Some(d) = v.strip_suffix("GB") {
            (d, 1024 * 1024 * 1024)
        } else if let Some(d) = v.strip_suffix("MB") {
            (d, 1024 * 1024)
        } else if let Some(d) = v.strip_suffix("KB") {
            (d, 1024)
        } else {
            (v, 1)
        };
        digits
            .trim()
            .parse::<i64>()
            .map(|n| n * factor)
            .unwrap_or(default)
    }

    /// String value with `here` substitution; falls back to `default` when
    /// the key is missing or the expression cannot be evaluated.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.key_values.get(key) {
            Some(v) => {
                let env = StringExpression::new().add("here", &self.config_dir.to_string_lossy());
                match env.eval(v) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(program = %self.program_name(), key, error = %e, "unable to evaluate expression");
                        default.to_string()
                    }
                }
            }
            None => default.to_string(),
        }
    }

    /// String value evaluated against the full process-scoped environment.
    pub fn get_string_expression(&self, key: &str) -> String {
        let Some(v) = self.key_values.get(key) else {
            return String::new();
        };
        match self.process_expression().eval(v) {
            Ok(s) => s,
            Err(e) => {
                warn!(program = %self.program_name(), key, error = %e, "unable to evaluate expression");
                v.clone()
            }
        }
    }

    pub fn get_string_array(&self, key: &str, sep: &str) -> Vec<String> {
        match self.key_values.get(key) {
            Some(v) if !v.trim().is_empty() => {
                v.split(sep).map(|s| s.trim().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Exit codes expected for a clean exit (`exitcodes` key).
    pub fn get_exit_codes(&self) -> Vec<i32> {
        let codes: Vec<i32> = self
            .get_string_array("exitcodes", ",")
            .iter()
            .filter_map(|c| c.parse().ok())
            .collect();
        if codes.is_empty() {
            vec![0, 2]
        } else {
            codes
        }
    }

    /// `environment = A="x y",B=z` parsed and templated per process.
    pub fn get_env(&self, key: &str) -> Vec<(String, String)> {
        let Some(value) = self.key_values.get(key) else {
            return Vec::new();
        };
        let env = self.process_expression();
        let mut result = Vec::new();
        for (k, v) in parse_env(value) {
            match env.eval(&v) {
                Ok(ev) => result.push((k, ev)),
                Err(e) => {
                    warn!(program = %self.program_name(), key = %k, error = %e, "unable to evaluate environment value")
                }
            }
        }
        result
    }

    /// `envFiles = global.env,prod.env` read and templated per process.
    pub fn get_env_from_files(&self, key: &str) -> Vec<(String, String)> {
        let Some(value) = self.key_values.get(key) else {
            return Vec::new();
        };
        let env = self.process_expression();
        let mut result = Vec::new();
        for file in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let path = if Path::new(file).is_absolute() {
                PathBuf::from(file)
            } else {
                self.config_dir.join(file)
            };
            match crate::process::command::load_env_file(&path) {
                Ok(pairs) => {
                    for (k, v) in pairs {
                        match env.eval(&v) {
                            Ok(ev) => result.push((k, ev)),
                            Err(e) => {
                                warn!(file = %path.display(), key = %k, error = %e, "unable to evaluate env file value")
                            }
                        }
                    }
                }
                Err(e) => warn!(file = %path.display(), error = %e, "failed to read env file"),
            }
        }
        result
    }

    fn process_expression(&self) -> StringExpression {
        StringExpression::new()
            .add("program_name", self.program_name())
            .add("process_num", &self.get_string("process_num", "0"))
            .add("group_name", &self.group)
            .add("here", &self.config_dir.to_string_lossy())
    }
}

/// Parse `A="value 1",B=simple` into key/value pairs. Values may be wrapped
/// in double quotes to protect commas and spaces.
pub fn parse_env(s: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let bytes = s.as_bytes();
    let n = bytes.len();
    let mut i = 0;

    while i < n {
        // find '='
        let key_start = i;
        while i < n && bytes[i] != b'=' {
            i += 1;
        }
        if i >= n {
            break;
        }
        let key = s[key_start..i].trim().to_string();
        i += 1;

        // skip whitespace before the value
        while i < n && (bytes[i] as char).is_whitespace() && bytes[i] != b'\n' {
            i += 1;
        }

        let value;
        if i < n && bytes[i] == b'"' {
            let v_start = i + 1;
            let mut j = v_start;
            while j < n && bytes[j] != b'"' {
                j += 1;
            }
            value = s[v_start..j.min(n)].to_string();
            i = j.saturating_add(1);
            // skip separator after the closing quote
            while i < n && (bytes[i] == b',' || (bytes[i] as char).is_whitespace()) {
                i += 1;
            }
        } else {
            let v_start = i;
            while i < n && bytes[i] != b',' && bytes[i] != b'\n' {
                i += 1;
            }
            value = s[v_start..i].trim().to_string();
            while i < n && (bytes[i] == b',' || (bytes[i] as char).is_whitespace()) {
                i += 1;
            }
        }
        if !key.is_empty() {
            result.push((key, value));
        }
    }

    result
}
