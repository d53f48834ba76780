//! Command-line and environment-file parsing for child processes

use crate::domain::{DomainError, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// Split a configured `command` value into argv, honoring single and double
/// quotes the way a shell would.
pub fn split_command(command_line: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(command_line).map_err(|e| DomainError::Failed(format!(
        "cannot parse command line '{command_line}': {e}"
    )))?;
    if argv.is_empty() {
        return Err(DomainError::Failed("empty command".to_string()));
    }
    Ok(argv)
}

/// Load `KEY=VALUE` pairs from an environment file. Blank lines and `#`
/// comments are skipped; malformed lines are logged and ignored.
pub fn load_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let file = std::fs::File::open(path).map_err(|e| {
        DomainError::Failed(format!("failed to open env file {}: {e}", path.display()))
    })?;

    let reader = BufReader::new(file);
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut vars: Vec<(String, String)> = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            DomainError::Failed(format!("failed to read env file {}: {e}", path.display()))
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim().to_string();
                let value = value.trim().trim_matches('"').to_string();
                if let Some(&idx) = seen.get(&key) {
                    vars[idx].1 = value;
                } else {
                    seen.insert(key.clone(), vars.len());
                    vars.push((key, value));
                }
            }
            None => {
                warn!(
                    file = %path.display(),
                    line = line_num + 1,
                    content = line,
                    "invalid line in env file (expected KEY=VALUE)"
                );
            }
        }
    }

    debug!(file = %path.display(), count = vars.len(), "loaded environment file");
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_simple() {
        assert_eq!(
            split_command("/bin/sleep 60").unwrap(),
            vec!["/bin/sleep", "60"]
        );
    }

    #[test]
    fn test_split_double_quotes() {
        assert_eq!(
            split_command("/bin/echo \"hello world\" x").unwrap(),
            vec!["/bin/echo", "hello world", "x"]
        );
    }

    #[test]
    fn test_split_single_quotes() {
        assert_eq!(
            split_command("/bin/sh -c 'sleep 60; echo done'").unwrap(),
            vec!["/bin/sh", "-c", "sleep 60; echo done"]
        );
    }

    #[test]
    fn test_split_empty_rejected() {
        assert!(split_command("").is_err());
        assert!(split_command("   ").is_err());
    }

    #[test]
    fn test_split_unbalanced_quote_rejected() {
        assert!(split_command("/bin/echo 'oops").is_err());
    }

    #[test]
    fn test_load_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "A=1").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "B = \"two words\"").unwrap();
        writeln!(f, "not a pair").unwrap();
        writeln!(f, "A=override").unwrap();

        let vars = load_env_file(&path).unwrap();
        assert_eq!(
            vars,
            vec![
                ("A".to_string(), "override".to_string()),
                ("B".to_string(), "two words".to_string())
            ]
        );
    }

    #[test]
    fn test_load_env_file_missing() {
        assert!(load_env_file(Path::new("/nonexistent/x.env")).is_err());
    }
}
