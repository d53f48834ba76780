//! INI reader for the supervisor configuration dialect
//!
//! Sections (`[program:web]`), `key=value` / `key: value` pairs, `;` and `#`
//! comment lines, and indented continuation lines appended to the previous
//! value. Loading several files merges sections; later keys win.

use crate::domain::{DomainError, Result};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Ini {
    sections: Vec<Section>,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    keys: Vec<(String, String)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keys: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.keys.iter().any(|(k, _)| k == key)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.keys.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.keys.push((key.to_string(), value.to_string()));
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Ini {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn sections_mut(&mut self) -> impl Iterator<Item = &mut Section> {
        self.sections.iter_mut()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut_or_create(&mut self, name: &str) -> &mut Section {
        if let Some(idx) = self.sections.iter().position(|s| s.name == name) {
            &mut self.sections[idx]
        } else {
            self.sections.push(Section::new(name));
            self.sections.last_mut().unwrap()
        }
    }

    /// Load and merge a file into this configuration.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DomainError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        self.load_str(&text)
    }

    /// Parse INI text and merge it into this configuration.
    pub fn load_str(&mut self, text: &str) -> Result<()> {
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let trimmed = raw.trim_end();
            if trimmed.trim().is_empty() {
                last_key = None;
                continue;
            }
            let first = trimmed.trim_start().chars().next().unwrap();
            if first == ';' || first == '#' {
                continue;
            }

            // continuation: indented line extends the previous value
            if raw.starts_with([' ', '\t']) {
                if let (Some(section), Some(key)) = (&current, &last_key) {
                    let section = self.section_mut_or_create(section);
                    let joined = match section.get(key) {
                        Some(prev) if !prev.is_empty() => {
                            format!("{prev}\n{}", trimmed.trim())
                        }
                        _ => trimmed.trim().to_string(),
                    };
                    section.set(key, &joined);
                    continue;
                }
                return Err(DomainError::InvalidConfiguration(format!(
                    "line {}: continuation without a preceding key",
                    lineno + 1
                )));
            }

            let line = trimmed.trim();
            if line.starts_with('[') {
                let end = line.find(']').ok_or_else(|| {
                    DomainError::InvalidConfiguration(format!(
                        "line {}: unterminated section header",
                        lineno + 1
                    ))
                })?;
                let name = line[1..end].trim().to_string();
                self.section_mut_or_create(&name);
                current = Some(name);
                last_key = None;
                continue;
            }

            let section_name = current.clone().ok_or_else(|| {
                DomainError::InvalidConfiguration(format!(
                    "line {}: key outside of any section",
                    lineno + 1
                ))
            })?;

            let sep = line
                .char_indices()
                .find(|(_, c)| *c == '=' || *c == ':')
                .map(|(i, _)| i)
                .ok_or_else(|| {
                    DomainError::InvalidConfiguration(format!(
                        "line {}: expected key=value",
                        lineno + 1
                    ))
                })?;
            let key = line[..sep].trim().to_string();
            let value = line[sep + 1..].trim().to_string();
            if key.is_empty() {
                return Err(DomainError::InvalidConfiguration(format!(
                    "line {}: empty key",
                    lineno + 1
                )));
            }
            self.section_mut_or_create(&section_name).set(&key, &value);
            last_key = Some(key);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_and_keys() {
        let mut ini = Ini::new();
        ini.load_str(
            "[supervisord]\nloglevel = info\n\n[program:web]\ncommand=/bin/sleep 60\npriority: 10\n",
        )
        .unwrap();

        assert_eq!(ini.section("supervisord").unwrap().get("loglevel"), Some("info"));
        let web = ini.section("program:web").unwrap();
        assert_eq!(web.get("command"), Some("/bin/sleep 60"));
        assert_eq!(web.get("priority"), Some("10"));
    }

    #[test]
    fn test_comments_ignored() {
        let mut ini = Ini::new();
        ini.load_str("; leading comment\n[a]\n# another\nk=v\n").unwrap();
        assert_eq!(ini.section("a").unwrap().get("k"), Some("v"));
    }

    #[test]
    fn test_continuation_lines() {
        let mut ini = Ini::new();
        ini.load_str("[program:web]\nenvironment=A=1,\n    B=2\n").unwrap();
        assert_eq!(
            ini.section("program:web").unwrap().get("environment"),
            Some("A=1,\nB=2")
        );
    }

    #[test]
    fn test_merge_later_wins() {
        let mut ini = Ini::new();
        ini.load_str("[program:web]\ncommand=/bin/a\npriority=5\n").unwrap();
        ini.load_str("[program:web]\ncommand=/bin/b\n").unwrap();
        let web = ini.section("program:web").unwrap();
        assert_eq!(web.get("command"), Some("/bin/b"));
        assert_eq!(web.get("priority"), Some("5"));
    }

    #[test]
    fn test_key_outside_section_rejected() {
        let mut ini = Ini::new();
        assert!(ini.load_str("k=v\n").is_err());
    }

    #[test]
    fn test_value_containing_equals() {
        let mut ini = Ini::new();
        ini.load_str("[program:web]\nenvironment=A=\"x=y\"\n").unwrap();
        assert_eq!(
            ini.section("program:web").unwrap().get("environment"),
            Some("A=\"x=y\"")
        );
    }
}
