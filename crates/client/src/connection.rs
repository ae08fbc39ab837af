// SPDX-License-Identifier: MIT

//! Connection lifecycle for the two service channels.
//!
//! A [`Connection`] owns the command channel (request/reply, guarded by its
//! own lock) and the event channel (read only by the event dispatch thread).
//! Each channel is opened against the same well-known socket path and
//! declares its role to the service before any traffic flows.

use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fetch_ipc::{wire, ChannelRole};

use crate::config::Config;
use crate::error::{Error, Result};

/// One live connection pair to the service.
#[derive(Debug)]
pub(crate) struct Connection {
    /// Command channel. The lock serializes whole request/reply exchanges so
    /// two callers can never interleave bytes on the wire.
    cmd: Mutex<UnixStream>,
    /// Event channel; blocking reads with no timeout.
    event: UnixStream,
    /// Set once teardown begins; the event thread checks it at the top of
    /// its loop and after any read error.
    stop: AtomicBool,
    /// Set when an exchange timed out and a stray reply may still be in
    /// flight on the command channel.
    stale: AtomicBool,
}

impl Connection {
    /// Open both channels and perform the role handshake on each.
    ///
    /// The command channel gets a bounded number of connect attempts; if an
    /// activator hook is configured it runs first, best-effort, so a
    /// not-yet-running service can be brought up.
    pub fn open(config: &Config) -> Result<Arc<Connection>> {
        if let Some(activator) = &config.activator {
            if let Err(e) = activator() {
                tracing::warn!("service activation failed: {}", e);
            }
        }

        let cmd = connect_channel(config, ChannelRole::Command, config.connect_attempts)?;
        let event = connect_channel(config, ChannelRole::Event, 1)?;

        // The event thread waits indefinitely between events; only the
        // command channel keeps the caller-facing timeout.
        event.set_read_timeout(None)?;

        tracing::debug!("connected to {}", config.socket_path.display());

        Ok(Arc::new(Connection {
            cmd: Mutex::new(cmd),
            event,
            stop: AtomicBool::new(false),
            stale: AtomicBool::new(false),
        }))
    }

    /// Lock the command channel for one full request/reply exchange.
    ///
    /// A poisoned lock is recovered rather than propagated: the stream is
    /// torn down by the caller on any failure anyway.
    pub fn lock_cmd(&self) -> MutexGuard<'_, UnixStream> {
        self.cmd.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn event_stream(&self) -> &UnixStream {
        &self.event
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Relaxed);
    }

    /// Read and clear the stale flag.
    pub fn take_stale(&self) -> bool {
        self.stale.swap(false, Ordering::Relaxed)
    }

    /// Begin teardown: flag the event thread to stop and shut both sockets
    /// down so blocked reads return immediately. Idempotent.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.event.shutdown(Shutdown::Both);
        let _ = self.lock_cmd().shutdown(Shutdown::Both);
    }
}

/// Connect one channel, configure its socket timeouts, and declare its role
/// followed by this process id.
fn connect_channel(config: &Config, role: ChannelRole, attempts: u32) -> Result<UnixStream> {
    let mut last_err = None;

    for attempt in 0..attempts.max(1) {
        if attempt > 0 {
            std::thread::sleep(config.retry_delay);
        }
        match UnixStream::connect(&config.socket_path) {
            Ok(stream) => return handshake(config, stream, role),
            Err(e) => {
                tracing::debug!(
                    "connect attempt {}/{} failed: {}",
                    attempt + 1,
                    attempts.max(1),
                    e
                );
                last_err = Some(e);
            }
        }
    }

    Err(Error::Io(last_err.unwrap_or_else(|| {
        std::io::Error::other("no connection attempt made")
    })))
}

fn handshake(config: &Config, stream: UnixStream, role: ChannelRole) -> Result<UnixStream> {
    stream.set_read_timeout(Some(config.timeout))?;
    stream.set_write_timeout(Some(config.timeout))?;

    let mut writer = &stream;
    wire::write_int(&mut writer, role.to_wire())?;
    wire::write_int(&mut writer, std::process::id() as i32)?;
    writer.flush()?;

    Ok(stream)
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
