// SPDX-License-Identifier: MIT

//! Client configuration: socket location, timeouts, connect retry policy,
//! and the optional service-activation hook.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Socket filename within the runtime directory.
const SOCKET_NAME: &str = "fetchd.sock";

/// Hook asked to start the service process when connecting fails because
/// nothing is listening. Best-effort: a missing or failing activator only
/// means connect attempts proceed without it.
pub type ServiceActivator = dyn Fn() -> std::io::Result<()> + Send + Sync;

/// Configuration for a [`Client`](crate::Client).
#[derive(Clone)]
pub struct Config {
    /// Path of the service's listening socket.
    pub socket_path: PathBuf,
    /// Send/receive timeout on the command channel. A hung service fails a
    /// call after this long instead of blocking the caller forever.
    pub timeout: Duration,
    /// Connection attempts for the command channel before giving up.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub retry_delay: Duration,
    pub(crate) activator: Option<Arc<ServiceActivator>>,
}

impl Config {
    /// Configuration for a service listening at `socket_path`, with the
    /// reference timeouts and retry policy.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Config {
            socket_path: socket_path.into(),
            timeout: Duration::from_millis(2500),
            connect_attempts: 3,
            retry_delay: Duration::from_millis(50),
            activator: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install a hook that asks the platform to start the service before
    /// connection attempts are made.
    pub fn with_activator<F>(mut self, activator: F) -> Self
    where
        F: Fn() -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.activator = Some(Arc::new(activator));
        self
    }
}

impl Default for Config {
    /// Socket path defaults to `fetchd.sock` in the user's runtime
    /// directory, falling back to the system temp directory.
    fn default() -> Self {
        let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        Config::new(dir.join(SOCKET_NAME))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("socket_path", &self.socket_path)
            .field("timeout", &self.timeout)
            .field("connect_attempts", &self.connect_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("activator", &self.activator.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
