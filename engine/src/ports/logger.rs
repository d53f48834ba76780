//! Logger port and implementations
//!
//! Child stdout/stderr is fanned into a `Logger`. Targets come from the
//! `*_logfile` config keys: `/dev/stdout`, `/dev/stderr`, `/dev/null`, a
//! filesystem path, or a comma-separated list multiplexing several targets.
//! File targets rotate at `maxbytes` keeping `backups` numbered siblings.
//! `syslog` targets are recognized but mapped to the null logger; the syslog
//! client is a collaborator contract.

use crate::domain::{DomainError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::warn;

/// Capability interface over a program log target.
pub trait Logger: Send {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn close(&mut self);
    /// Read `length` bytes starting at `offset`. Negative offset counts from
    /// the end; zero length means "to EOF".
    fn read_log(&mut self, offset: i64, length: i64) -> Result<String>;
    /// Tail semantics: returns (chunk, new offset, overflowed).
    fn read_tail_log(&mut self, offset: i64, length: i64) -> Result<(String, i64, bool)>;
    fn clear_current(&mut self) -> Result<()>;
    fn clear_all(&mut self) -> Result<()>;
    fn set_pid(&mut self, _pid: u32) {}
}

// ===== Null =====

/// Discards everything; reads report NoFile.
#[derive(Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn write(&mut self, _data: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn read_log(&mut self, _offset: i64, _length: i64) -> Result<String> {
        Err(DomainError::NoFile)
    }

    fn read_tail_log(&mut self, _offset: i64, _length: i64) -> Result<(String, i64, bool)> {
        Err(DomainError::NoFile)
    }

    fn clear_current(&mut self) -> Result<()> {
        Err(DomainError::NoFile)
    }

    fn clear_all(&mut self) -> Result<()> {
        Err(DomainError::NoFile)
    }
}

// ===== Stdout / stderr passthrough =====

pub struct StdLogger {
    to_stderr: bool,
}

impl StdLogger {
    pub fn stdout() -> Self {
        Self { to_stderr: false }
    }

    pub fn stderr() -> Self {
        Self { to_stderr: true }
    }
}

impl Logger for StdLogger {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if self.to_stderr {
            std::io::stderr().write_all(data)
        } else {
            std::io::stdout().write_all(data)
        }
    }

    fn close(&mut self) {}

    fn read_log(&mut self, _offset: i64, _length: i64) -> Result<String> {
        Err(DomainError::NoFile)
    }

    fn read_tail_log(&mut self, _offset: i64, _length: i64) -> Result<(String, i64, bool)> {
        Err(DomainError::NoFile)
    }

    fn clear_current(&mut self) -> Result<()> {
        Err(DomainError::NoFile)
    }

    fn clear_all(&mut self) -> Result<()> {
        Err(DomainError::NoFile)
    }
}

// ===== Rotating file =====

pub struct FileLogger {
    path: PathBuf,
    max_bytes: i64,
    backups: i64,
    file: Option<File>,
    file_size: i64,
}

impl FileLogger {
    pub fn new(path: PathBuf, max_bytes: i64, backups: i64) -> Self {
        let mut logger = Self {
            path,
            max_bytes,
            backups,
            file: None,
            file_size: 0,
        };
        if let Err(e) = logger.open_file(false) {
            warn!(path = %logger.path.display(), error = %e, "failed to open log file");
        }
        logger
    }

    fn open_file(&mut self, truncate: bool) -> std::io::Result<()> {
        self.file = None;
        if truncate || !self.path.exists() {
            self.file_size = 0;
            self.file = Some(File::create(&self.path)?);
        } else {
            self.file_size = std::fs::metadata(&self.path)?.len() as i64;
            self.file = Some(OpenOptions::new().append(true).open(&self.path)?);
        }
        Ok(())
    }

    fn rotate(&mut self) {
        for i in (1..self.backups).rev() {
            let src = self.backup_path(i);
            if src.exists() {
                let _ = std::fs::rename(&src, self.backup_path(i + 1));
            }
        }
        if self.backups > 0 {
            let _ = std::fs::rename(&self.path, self.backup_path(1));
        }
    }

    fn backup_path(&self, n: i64) -> PathBuf {
        let mut s = self.path.as_os_str().to_os_string();
        s.push(format!(".{n}"));
        PathBuf::from(s)
    }
}

/// Clamp a (offset, length) request against the current file size. Returns
/// None when there is nothing to read.
fn read_window(offset: i64, length: i64, file_len: i64) -> Option<(i64, i64)> {
    if offset < 0 {
        let start = (file_len + offset).max(0);
        return Some((start, file_len - start));
    }
    if length == 0 {
        if offset > file_len {
            return None;
        }
        return Some((offset, file_len - offset));
    }
    if offset >= file_len {
        return None;
    }
    Some((offset, length.min(file_len - offset)))
}

impl Logger for FileLogger {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            // retry the open; the directory may exist by now
            self.open_file(false)?;
            return self.write(data);
        };
        file.write_all(data)?;
        self.file_size += data.len() as i64;
        if self.max_bytes > 0 && self.file_size >= self.max_bytes {
            self.close();
            self.rotate();
            self.open_file(true)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn read_log(&mut self, offset: i64, length: i64) -> Result<String> {
        if (offset < 0 && length != 0) || (offset >= 0 && length < 0) {
            return Err(DomainError::BadArguments(format!(
                "offset={offset} length={length}"
            )));
        }
        let mut f = File::open(&self.path).map_err(|_| DomainError::NoFile)?;
        let file_len = f.metadata().map_err(|_| DomainError::NoFile)?.len() as i64;
        let Some((start, len)) = read_window(offset, length, file_len) else {
            return Ok(String::new());
        };
        f.seek(SeekFrom::Start(start as u64))
            .map_err(|e| DomainError::Failed(e.to_string()))?;
        let mut buf = vec![0u8; len as usize];
        let n = f
            .read(&mut buf)
            .map_err(|e| DomainError::Failed(e.to_string()))?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    fn read_tail_log(&mut self, offset: i64, length: i64) -> Result<(String, i64, bool)> {
        if offset < 0 || length < 0 {
            return Err(DomainError::BadArguments(format!(
                "offset={offset} length={length}"
            )));
        }
        let mut f = File::open(&self.path).map_err(|_| DomainError::NoFile)?;
        let file_len = f.metadata().map_err(|_| DomainError::NoFile)?.len() as i64;
        if offset >= file_len {
            return Ok((String::new(), file_len, true));
        }
        let len = length.min(file_len - offset);
        f.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| DomainError::Failed(e.to_string()))?;
        let mut buf = vec![0u8; len as usize];
        let n = f
            .read(&mut buf)
            .map_err(|e| DomainError::Failed(e.to_string()))?;
        Ok((
            String::from_utf8_lossy(&buf[..n]).into_owned(),
            offset + n as i64,
            false,
        ))
    }

    fn clear_current(&mut self) -> Result<()> {
        self.open_file(true)
            .map_err(|e| DomainError::Failed(e.to_string()))
    }

    fn clear_all(&mut self) -> Result<()> {
        for i in 1..=self.backups {
            let backup = self.backup_path(i);
            if backup.exists() {
                std::fs::remove_file(&backup)
                    .map_err(|e| DomainError::Failed(e.to_string()))?;
            }
        }
        self.clear_current()
    }
}

// ===== Composite =====

/// Forwards writes to every member, reads only from the first.
pub struct CompositeLogger {
    loggers: Vec<Box<dyn Logger>>,
}

impl CompositeLogger {
    pub fn new(loggers: Vec<Box<dyn Logger>>) -> Self {
        Self { loggers }
    }
}

impl Logger for CompositeLogger {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut first_result = Ok(());
        for (i, logger) in self.loggers.iter_mut().enumerate() {
            let result = logger.write(data);
            if i == 0 {
                first_result = result;
            }
        }
        first_result
    }

    fn close(&mut self) {
        for logger in &mut self.loggers {
            logger.close();
        }
    }

    fn read_log(&mut self, offset: i64, length: i64) -> Result<String> {
        self.loggers[0].read_log(offset, length)
    }

    fn read_tail_log(&mut self, offset: i64, length: i64) -> Result<(String, i64, bool)> {
        self.loggers[0].read_tail_log(offset, length)
    }

    fn clear_current(&mut self) -> Result<()> {
        self.loggers[0].clear_current()
    }

    fn clear_all(&mut self) -> Result<()> {
        self.loggers[0].clear_all()
    }

    fn set_pid(&mut self, pid: u32) {
        for logger in &mut self.loggers {
            logger.set_pid(pid);
        }
    }
}

/// Build a logger from a `*_logfile` config value.
pub fn new_logger(log_spec: &str, max_bytes: i64, backups: i64) -> Box<dyn Logger> {
    let targets: Vec<&str> = log_spec.split(',').map(str::trim).collect();
    if targets.len() == 1 {
        return single_logger(targets[0], max_bytes, backups);
    }
    CompositeLogger::new(
        targets
            .into_iter()
            .map(|t| single_logger(t, max_bytes, backups))
            .collect::<Vec<_>>(),
    )
    .into()
}

impl From<CompositeLogger> for Box<dyn Logger> {
    fn from(value: CompositeLogger) -> Self {
        Box::new(value)
    }
}

fn single_logger(target: &str, max_bytes: i64, backups: i64) -> Box<dyn Logger> {
    match target {
        "" | "/dev/null" => Box::new(NullLogger),
        "/dev/stdout" => Box::new(StdLogger::stdout()),
        "/dev/stderr" => Box::new(StdLogger::stderr()),
        t if t == "syslog" || t.starts_with("syslog@") => {
            warn!(target = t, "syslog log target is not wired; discarding");
            Box::new(NullLogger)
        }
        path => Box::new(FileLogger::new(PathBuf::from(path), max_bytes, backups)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_logger(dir: &tempfile::TempDir, max_bytes: i64, backups: i64) -> FileLogger {
        FileLogger::new(dir.path().join("test.log"), max_bytes, backups)
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 0, 0);
        logger.write(b"hello world").unwrap();
        assert_eq!(logger.read_log(0, 0).unwrap(), "hello world");
        assert_eq!(logger.read_log(6, 5).unwrap(), "world");
    }

    #[test]
    fn test_read_negative_offset_from_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 0, 0);
        logger.write(b"0123456789").unwrap();
        assert_eq!(logger.read_log(-4, 0).unwrap(), "6789");
        // negative offset larger than the file reads everything
        assert_eq!(logger.read_log(-100, 0).unwrap(), "0123456789");
    }

    #[test]
    fn test_read_bad_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 0, 0);
        logger.write(b"x").unwrap();
        assert!(matches!(
            logger.read_log(-1, 5),
            Err(DomainError::BadArguments(_))
        ));
        assert!(matches!(
            logger.read_log(0, -5),
            Err(DomainError::BadArguments(_))
        ));
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 0, 0);
        logger.write(b"abc").unwrap();
        assert_eq!(logger.read_log(100, 10).unwrap(), "");
    }

    #[test]
    fn test_tail_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 0, 0);
        logger.write(b"0123456789").unwrap();

        let (chunk, new_offset, overflowed) = logger.read_tail_log(0, 4).unwrap();
        assert_eq!(chunk, "0123");
        assert_eq!(new_offset, 4);
        assert!(!overflowed);

        let (chunk, new_offset, overflowed) = logger.read_tail_log(new_offset, 100).unwrap();
        assert_eq!(chunk, "456789");
        assert_eq!(new_offset, 10);
        assert!(!overflowed);

        // offset beyond EOF reports overflow and resets to the file length
        let (chunk, new_offset, overflowed) = logger.read_tail_log(50, 10).unwrap();
        assert_eq!(chunk, "");
        assert_eq!(new_offset, 10);
        assert!(overflowed);
    }

    #[test]
    fn test_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 8, 2);
        logger.write(b"AAAAAAAAAA").unwrap(); // exceeds 8 bytes, rotates
        logger.write(b"BB").unwrap();

        assert!(dir.path().join("test.log.1").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("test.log.1")).unwrap(),
            "AAAAAAAAAA"
        );
        assert_eq!(logger.read_log(0, 0).unwrap(), "BB");
    }

    #[test]
    fn test_rotation_keeps_backup_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 4, 2);
        for chunk in [b"1111", b"2222", b"3333", b"4444"] {
            logger.write(chunk).unwrap();
        }
        assert!(dir.path().join("test.log.1").exists());
        assert!(dir.path().join("test.log.2").exists());
        assert!(!dir.path().join("test.log.3").exists());
    }

    #[test]
    fn test_clear_all_removes_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = file_logger(&dir, 4, 2);
        logger.write(b"11112222").unwrap();
        assert!(dir.path().join("test.log.1").exists());
        logger.clear_all().unwrap();
        assert!(!dir.path().join("test.log.1").exists());
        assert_eq!(logger.read_log(0, 0).unwrap(), "");
    }

    #[test]
    fn test_null_logger_reads_fail() {
        let mut logger = NullLogger;
        logger.write(b"discarded").unwrap();
        assert!(matches!(logger.read_log(0, 0), Err(DomainError::NoFile)));
        assert!(matches!(
            logger.read_tail_log(0, 10),
            Err(DomainError::NoFile)
        ));
    }

    #[test]
    fn test_composite_writes_all_reads_first() {
        let dir = tempfile::tempdir().unwrap();
        let first = Box::new(FileLogger::new(dir.path().join("a.log"), 0, 0));
        let second = Box::new(FileLogger::new(dir.path().join("b.log"), 0, 0));
        let mut composite = CompositeLogger::new(vec![first, second]);

        composite.write(b"both").unwrap();
        assert_eq!(composite.read_log(0, 0).unwrap(), "both");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.log")).unwrap(),
            "both"
        );
    }

    #[test]
    fn test_factory_targets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        let mut logger = new_logger(path.to_str().unwrap(), 0, 0);
        logger.write(b"via factory").unwrap();
        assert_eq!(logger.read_log(0, 0).unwrap(), "via factory");

        let mut null = new_logger("/dev/null", 0, 0);
        assert!(null.read_log(0, 0).is_err());

        let mut sys = new_logger("syslog", 0, 0);
        assert!(sys.read_log(0, 0).is_err());
    }
}
