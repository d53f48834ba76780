//! Template substitution for configuration values
//!
//! Evaluates `%(var)s` and `%(var)d` placeholders against an environment of
//! process-scoped names plus the supervisor's own environment variables
//! prefixed with `ENV_`. The `d` conversion accepts an optional printf-style
//! width between `)` and `d`, e.g. `%(process_num)02d`.

use crate::domain::{DomainError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct StringExpression {
    env: HashMap<String, String>,
}

impl StringExpression {
    /// Build an expression environment seeded with `ENV_*` variables from the
    /// supervisor's environment and `host_node_name`.
    pub fn new() -> Self {
        let mut env = HashMap::new();
        for (k, v) in std::env::vars() {
            env.insert(format!("ENV_{k}"), v);
        }
        if let Some(hostname) = hostname() {
            env.insert("host_node_name".to_string(), hostname);
        }
        Self { env }
    }

    /// Add a variable to the environment.
    pub fn add(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Substitute every placeholder in `s`, failing on unknown variables,
    /// non-integer values for `d` conversions, and malformed expressions.
    pub fn eval(&self, s: &str) -> Result<String> {
        let mut s = s.to_string();
        loop {
            let Some(start) = s.find("%(") else {
                return Ok(s);
            };
            let bytes = s.as_bytes();
            let n = bytes.len();

            let mut end = start + 2;
            while end < n && bytes[end] != b')' {
                end += 1;
            }
            if end >= n {
                return Err(DomainError::InvalidStringExpression);
            }

            // conversion type follows the optional format between ')' and the letter
            let mut typ = end + 1;
            while typ < n && !bytes[typ].is_ascii_alphabetic() {
                typ += 1;
            }
            if typ >= n {
                return Err(DomainError::InvalidStringExpression);
            }

            let var_name = &s[start + 2..end];
            let value = self
                .env
                .get(var_name)
                .ok_or_else(|| DomainError::EnvVarNotFound(var_name.to_string()))?;

            let rendered = match bytes[typ] {
                b's' => value.clone(),
                b'd' => {
                    let i: i64 = value
                        .parse()
                        .map_err(|_| DomainError::EnvVarConversion(value.clone()))?;
                    format_int(i, &s[end + 1..typ])?
                }
                other => {
                    return Err(DomainError::TypeNotImplemented(
                        (other as char).to_string(),
                    ))
                }
            };

            s = format!("{}{}{}", &s[..start], rendered, &s[typ + 1..]);
        }
    }
}

impl Default for StringExpression {
    fn default() -> Self {
        Self::new()
    }
}

/// Render an integer with an optional printf-style width: `""`, `"2"`, `"02"`.
fn format_int(value: i64, fmt: &str) -> Result<String> {
    if fmt.is_empty() {
        return Ok(value.to_string());
    }
    let zero_pad = fmt.starts_with('0');
    let width: usize = fmt
        .trim_start_matches('0')
        .parse()
        .or_else(|e| if fmt.chars().all(|c| c == '0') { Ok(0) } else { Err(e) })
        .map_err(|_| DomainError::InvalidStringExpression)?;
    if zero_pad {
        Ok(format!("{value:0width$}"))
    } else {
        Ok(format!("{value:width$}"))
    }
}

fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..end].to_vec()).ok()
}
