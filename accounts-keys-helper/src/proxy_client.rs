use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use accounts_core::AccountsError;

/// Default socket read/write timeout for general lookups.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Timeout used by the `authorized_keys` helper specifically — SSH key
/// fetches may need to wait on an upstream refresh.
pub const AUTHORIZED_KEYS_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking client for the accounts proxy's line protocol. Intentionally
/// synchronous: the tools that embed this (the `authorized_keys` SSH helper,
/// an NSS bridge) are short-lived processes that issue exactly one request,
/// so pulling in an async runtime buys nothing.
pub struct ProxyClient {
    socket_path: std::path::PathBuf,
    timeout: Duration,
}

impl ProxyClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self::with_timeout(socket_path, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(socket_path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout,
        }
    }

    /// Sends `command` (e.g. `"get_authorized_keys user1"`), reads the
    /// response to EOF, and returns the body lines on success.
    pub fn get_account_info(&self, command: &str) -> Result<Vec<String>, AccountsError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .map_err(|e| AccountsError::Backend(format!("cannot connect to {}: {e}", self.socket_path.display())))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| AccountsError::Backend(format!("cannot set read timeout: {e}")))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| AccountsError::Backend(format!("cannot set write timeout: {e}")))?;

        stream
            .write_all(command.as_bytes())
            .map_err(|e| AccountsError::Backend(format!("write failed: {e}")))?;
        stream
            .shutdown(std::net::Shutdown::Write)
            .map_err(|e| AccountsError::Backend(format!("shutdown(write) failed: {e}")))?;

        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .map_err(|e| AccountsError::Backend(format!("read failed: {e}")))?;

        let mut lines = response.lines();
        let status = lines
            .next()
            .ok_or_else(|| AccountsError::Backend("empty response from proxy".to_string()))?;

        match status {
            "200" => Ok(lines.map(|s| s.to_string()).collect()),
            "404" => Err(AccountsError::NotFound(command.to_string())),
            other => Err(AccountsError::Backend(format!(
                "proxy returned status {other} for {command}"
            ))),
        }
    }
}
