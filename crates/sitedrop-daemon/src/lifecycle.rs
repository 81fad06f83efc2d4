//! Daemon process lifecycle: detaching from the terminal and PID file
//! management.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Detach the process from its controlling terminal.
///
/// Double fork with an intermediate `setsid`, then chdir to `/` and point
/// stdin/stdout/stderr at `/dev/null`. The parent and intermediate child
/// exit inside this call; only the detached process returns.
pub fn detach() -> Result<()> {
    fork_and_exit_parent().context("First fork failed")?;

    if unsafe { libc::setsid() } == -1 {
        anyhow::bail!("setsid failed");
    }

    // Second fork so the daemon can never reacquire a terminal
    fork_and_exit_parent().context("Second fork failed")?;

    // Don't hold a mount point open
    std::env::set_current_dir("/").ok();

    redirect_stdio_to_null()
}

fn fork_and_exit_parent() -> Result<()> {
    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("fork returned -1"),
        0 => Ok(()),
        _ => std::process::exit(0),
    }
}

fn redirect_stdio_to_null() -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let dev_null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("Failed to open /dev/null")?;

    unsafe {
        libc::dup2(dev_null.as_raw_fd(), libc::STDIN_FILENO);
        libc::dup2(dev_null.as_raw_fd(), libc::STDOUT_FILENO);
        libc::dup2(dev_null.as_raw_fd(), libc::STDERR_FILENO);
    }
    Ok(())
}

/// Written PID file, removed again on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`, creating parent directories
    /// as needed.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create PID directory")?;
        }
        std::fs::write(path, std::process::id().to_string())
            .context("Failed to write PID file")?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

/// Log file for a detached daemon, kept next to its PID file.
pub fn log_file_path(pid_path: &Path) -> PathBuf {
    pid_path
        .parent()
        .unwrap_or(Path::new("/tmp"))
        .join("sitedrop-daemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_holds_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let pid_file = PidFile::create(&path).unwrap();
        let written = std::fs::read_to_string(pid_file.path()).unwrap();
        assert_eq!(written, std::process::id().to_string());
    }

    #[test]
    fn test_pid_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let pid_file = PidFile::create(&path).unwrap();
        assert!(path.exists());
        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn test_pid_file_creates_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run/daemon.pid");

        let _pid_file = PidFile::create(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_log_file_sits_next_to_pid_file() {
        assert_eq!(
            log_file_path(Path::new("/var/run/sitedrop/daemon.pid")),
            Path::new("/var/run/sitedrop/sitedrop-daemon.log")
        );
    }
}
