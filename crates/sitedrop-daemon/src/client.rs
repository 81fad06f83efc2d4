//! Client library for communicating with sitedrop-daemon
//!
//! Provides a synchronous client for IPC communication with the daemon
//! over Unix sockets.

use crate::protocol::{DaemonStatus, PostReceipt, Request, Response};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sitedrop_core::{Post, PostPage, StoreStats};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout for client requests (30 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Time to wait for graceful shutdown before sending SIGKILL (500ms)
const GRACEFUL_SHUTDOWN_WAIT_MS: u64 = 500;

/// Synchronous client for communicating with the daemon
pub struct Client {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Client {
    /// Create a new client with the given socket path
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Create a client with the default socket path
    pub fn with_default_socket() -> Self {
        Self::new(&crate::server::default_socket_path())
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon is running (socket exists and responds)
    pub fn is_daemon_running(&self) -> bool {
        if !self.socket_path.exists() {
            return false;
        }

        self.status().is_ok()
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream =
            UnixStream::connect(&self.socket_path).context("Failed to connect to daemon")?;
        stream
            .set_read_timeout(Some(self.timeout))
            .context("Failed to set read timeout")?;
        stream
            .set_write_timeout(Some(self.timeout))
            .context("Failed to set write timeout")?;
        Ok(stream)
    }

    /// Send a request to the daemon and wait for a single response
    fn send_request(&self, request: &Request) -> Result<Response> {
        let mut stream = self.connect()?;

        let request_json = serde_json::to_string(request)?;
        stream.write_all(request_json.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line)?;

        let response: Response =
            serde_json::from_str(&response_line).context("Failed to parse daemon response")?;

        Ok(response)
    }

    /// Ingest a body with the given content type
    pub fn ingest(&self, content_type: &str, body: &[u8]) -> Result<PostReceipt> {
        let request = Request::Ingest {
            content_type: content_type.to_string(),
            body_base64: BASE64.encode(body),
        };

        match self.send_request(&request)? {
            Response::Posted(receipt) => Ok(receipt),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Fetch one page of posts, newest first
    pub fn list(&self, page: usize, page_size: usize) -> Result<PostPage> {
        let request = Request::List { page, page_size };

        match self.send_request(&request)? {
            Response::Page(page) => Ok(page),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Fetch one post by id
    pub fn get(&self, id: &str) -> Result<Post> {
        let request = Request::Get { id: id.to_string() };

        match self.send_request(&request)? {
            Response::Post(post) => Ok(*post),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Delete one post by id
    pub fn delete(&self, id: &str) -> Result<()> {
        let request = Request::Delete { id: id.to_string() };

        match self.send_request(&request)? {
            Response::Ok => Ok(()),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Download a stored archive, rebuilt as ZIP bytes
    pub fn download(&self, id: &str) -> Result<(String, Vec<u8>)> {
        let request = Request::Download { id: id.to_string() };

        match self.send_request(&request)? {
            Response::Zip {
                filename,
                data_base64,
            } => {
                let data = BASE64
                    .decode(&data_base64)
                    .context("Failed to decode archive data")?;
                Ok((filename, data))
            }
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Render a stored HTML post or archive as one sanitized document
    pub fn render(&self, id: &str) -> Result<String> {
        let request = Request::Render { id: id.to_string() };

        match self.send_request(&request)? {
            Response::Html { html } => Ok(html),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Delete every stored post
    pub fn clear(&self) -> Result<()> {
        match self.send_request(&Request::Clear)? {
            Response::Ok => Ok(()),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Number of stored posts
    pub fn count(&self) -> Result<usize> {
        match self.send_request(&Request::Count)? {
            Response::Count(count) => Ok(count),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Storage usage estimate
    pub fn stats(&self) -> Result<StoreStats> {
        match self.send_request(&Request::Stats)? {
            Response::Stats(stats) => Ok(stats),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Get daemon status
    pub fn status(&self) -> Result<DaemonStatus> {
        match self.send_request(&Request::Status)? {
            Response::Status(status) => Ok(status),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Request the daemon to shutdown
    pub fn shutdown(&self) -> Result<()> {
        match self.send_request(&Request::Shutdown)? {
            Response::Ok => Ok(()),
            Response::Error { code, message } => anyhow::bail!("Daemon error ({code}): {message}"),
            _ => anyhow::bail!("Unexpected response from daemon"),
        }
    }

    /// Stream posts from the daemon: recent posts first, then every new
    /// ingest. Blocks until the callback returns `false` or the daemon
    /// closes the connection. No read timeout is set because the stream is
    /// expected to idle between posts.
    pub fn watch(&self, mut on_post: impl FnMut(Post) -> bool) -> Result<()> {
        let mut stream =
            UnixStream::connect(&self.socket_path).context("Failed to connect to daemon")?;

        let request_json = serde_json::to_string(&Request::Watch)?;
        stream.write_all(request_json.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(()); // Daemon closed the stream
            }

            let response: Response =
                serde_json::from_str(&line).context("Failed to parse daemon response")?;
            match response {
                Response::Post(post) => {
                    if !on_post(*post) {
                        return Ok(());
                    }
                }
                Response::Error { code, message } => {
                    anyhow::bail!("Daemon error ({code}): {message}")
                }
                _ => anyhow::bail!("Unexpected response from daemon"),
            }
        }
    }
}

/// Read the daemon PID from the PID file
pub fn read_daemon_pid(pid_path: &Path) -> Result<Option<u32>> {
    if !pid_path.exists() {
        return Ok(None);
    }

    let pid_str = std::fs::read_to_string(pid_path).context("Failed to read PID file")?;
    let pid: u32 = pid_str.trim().parse().context("Invalid PID in file")?;

    // Check if process is actually running
    let is_running = unsafe { libc::kill(pid as i32, 0) } == 0;

    if is_running {
        Ok(Some(pid))
    } else {
        // Stale PID file, remove it
        std::fs::remove_file(pid_path).ok();
        Ok(None)
    }
}

/// Kill the daemon process
pub fn kill_daemon(pid_path: &Path) -> Result<bool> {
    if let Some(pid) = read_daemon_pid(pid_path)? {
        // Send SIGTERM
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result == 0 {
            // Wait a bit for graceful shutdown
            std::thread::sleep(Duration::from_millis(GRACEFUL_SHUTDOWN_WAIT_MS));

            // Check if still running
            if unsafe { libc::kill(pid as i32, 0) } == 0 {
                // Still running, send SIGKILL
                unsafe { libc::kill(pid as i32, libc::SIGKILL) };
            }
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_daemon_pid_nonexistent_file() {
        let path = Path::new("/nonexistent/path/to/pid");
        let result = read_daemon_pid(path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_read_daemon_pid_invalid_content() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not-a-number").unwrap();

        let result = read_daemon_pid(file.path());
        assert!(result.is_err(), "Should fail on invalid PID content");
    }

    #[test]
    fn test_read_daemon_pid_stale_pid() {
        // Use a PID that definitely doesn't exist (very high number)
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "999999999").unwrap();

        let result = read_daemon_pid(file.path()).unwrap();
        assert!(result.is_none(), "Should return None for non-running PID");
        assert!(!file.path().exists(), "Stale PID file should be removed");
    }

    #[test]
    fn test_read_daemon_pid_current_process() {
        // Use our own PID, which is definitely running
        let mut file = NamedTempFile::new().unwrap();
        let our_pid = std::process::id();
        writeln!(file, "{our_pid}").unwrap();

        let result = read_daemon_pid(file.path()).unwrap();
        assert_eq!(result, Some(our_pid), "Should return running PID");
    }

    #[test]
    fn test_kill_daemon_nonexistent_pid_file() {
        let path = Path::new("/nonexistent/path/to/pid");
        let result = kill_daemon(path).unwrap();
        assert!(!result, "Should return false when PID file doesn't exist");
    }

    #[test]
    fn test_kill_daemon_stale_pid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "999999999").unwrap();

        let result = kill_daemon(file.path()).unwrap();
        assert!(!result, "Should return false for non-running PID");
    }

    #[test]
    fn test_client_new_sets_socket_path() {
        let path = Path::new("/tmp/test.sock");
        let client = Client::new(path);
        assert!(!client.is_daemon_running());
    }

    #[test]
    fn test_client_with_timeout_builder() {
        let path = Path::new("/tmp/nonexistent-sitedrop-test-socket.sock");
        let timeout = Duration::from_secs(60);
        let client = Client::new(path).with_timeout(timeout);
        assert!(!client.is_daemon_running());
    }

    #[test]
    fn test_client_is_daemon_running_checks_socket_exists() {
        // A regular file exists but is not a socket; connecting fails
        let file = NamedTempFile::new().unwrap();
        let client = Client::new(file.path());
        assert!(!client.is_daemon_running());
    }
}
