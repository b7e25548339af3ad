// src/supervisor/pidfile.rs

//! The supervisor's PID file (§4.9, §5): supervisor PID, data directory,
//! start-time epoch, and the PID of every supervised child, plus the
//! cross-process log semaphore id. Advisory-locked via `libc::flock` so a
//! live supervisor refuses a second instance over the same file.

use crate::error::{PgAutoFailoverError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidFile {
    pub supervisor_pid: u32,
    pub data_dir: PathBuf,
    pub start_time_epoch: u64,
    pub semaphore_id: i32,
    pub children: Vec<(String, u32)>,
}

/// Holds the advisory lock for as long as this handle lives; dropping it
/// releases the lock (and the OS releases it regardless on process exit).
#[derive(Debug)]
pub struct PidFileGuard {
    _file: File,
    path: PathBuf,
}

impl PidFile {
    pub fn new(data_dir: PathBuf, semaphore_id: i32) -> Self {
        Self {
            supervisor_pid: std::process::id(),
            data_dir,
            start_time_epoch: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            semaphore_id,
            children: Vec::new(),
        }
    }

    /// Line order per §6: supervisor pid, data dir, start time, one
    /// `name pid` pair per child, semaphore id last.
    fn render(&self) -> String {
        let mut lines = vec![
            self.supervisor_pid.to_string(),
            self.data_dir.display().to_string(),
            self.start_time_epoch.to_string(),
        ];
        for (name, pid) in &self.children {
            lines.push(format!("{name} {pid}"));
        }
        lines.push(self.semaphore_id.to_string());
        lines.join("\n")
    }

    fn parse(contents: &str) -> Result<Self> {
        let mut lines: Vec<&str> = contents.lines().collect();
        let semaphore_id = lines
            .pop()
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| PgAutoFailoverError::Configuration("pid file missing semaphore id".into()))?;
        let mut lines = lines.into_iter();
        let supervisor_pid = lines
            .next()
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| PgAutoFailoverError::Configuration("pid file missing supervisor pid".into()))?;
        let data_dir = lines
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| PgAutoFailoverError::Configuration("pid file missing data dir".into()))?;
        let start_time_epoch = lines
            .next()
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| PgAutoFailoverError::Configuration("pid file missing start time".into()))?;
        let children = lines
            .filter_map(|l| {
                let (name, pid) = l.split_once(' ')?;
                Some((name.to_string(), pid.parse().ok()?))
            })
            .collect();
        Ok(Self {
            supervisor_pid,
            data_dir,
            start_time_epoch,
            semaphore_id,
            children,
        })
    }

    /// Creates and exclusively locks the PID file. Refuses with
    /// `InvariantViolation` if a live supervisor already owns it.
    pub fn acquire(path: &Path, data_dir: PathBuf, semaphore_id: i32) -> Result<(Self, PidFileGuard)> {
        let mut file = OpenOptions::new().create(true).truncate(false).read(true).write(true).open(path)?;

        let lock_result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if lock_result != 0 {
            let mut existing = String::new();
            let _ = file.read_to_string(&mut existing);
            return Err(PgAutoFailoverError::InvariantViolation(format!(
                "a supervisor already owns {}: {existing}",
                path.display()
            )));
        }

        let pidfile = PidFile::new(data_dir, semaphore_id);
        file.set_len(0)?;
        file.write_all(pidfile.render().as_bytes())?;
        file.flush()?;

        Ok((
            pidfile,
            PidFileGuard {
                _file: file,
                path: path.to_path_buf(),
            },
        ))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn persist(&self, guard: &mut PidFileGuard) -> Result<()> {
        guard._file.set_len(0)?;
        use std::io::Seek;
        guard._file.seek(std::io::SeekFrom::Start(0))?;
        guard._file.write_all(self.render().as_bytes())?;
        guard._file.flush()?;
        Ok(())
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_render_and_parse() {
        let mut pidfile = PidFile::new(PathBuf::from("/var/lib/postgresql/data"), 42);
        pidfile.children.push(("node-active".to_string(), 1234));
        let rendered = pidfile.render();
        let parsed = PidFile::parse(&rendered).unwrap();
        assert_eq!(parsed.supervisor_pid, pidfile.supervisor_pid);
        assert_eq!(parsed.children, pidfile.children);
    }

    #[test]
    fn second_acquire_is_refused_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg_autoctl.pid");
        let (_pidfile, _guard) = PidFile::acquire(&path, dir.path().to_path_buf(), 1).unwrap();
        let err = PidFile::acquire(&path, dir.path().to_path_buf(), 1).unwrap_err();
        assert!(matches!(err, PgAutoFailoverError::InvariantViolation(_)));
    }

    #[test]
    fn file_is_removed_when_guard_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg_autoctl.pid");
        {
            let (_pidfile, _guard) = PidFile::acquire(&path, dir.path().to_path_buf(), 1).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
