// SPDX-License-Identifier: MIT

//! Command dispatch: one-request-one-reply exchanges on the command channel.
//!
//! Every exchange holds the command-channel lock from the first header byte
//! until the full reply (including any payload) has been read, so replies are
//! always byte-aligned to their own request. Any wire failure mid-exchange
//! leaves the stream desynchronized; the caller reacts by tearing down the
//! whole connection.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use fetch_ipc::{wire, Opcode, WireError, NO_SESSION};

use crate::connection::Connection;
use crate::error::{Error, Result};

/// A typed command argument, written after the header in opcode order.
pub(crate) enum Arg<'a> {
    Int(i32),
    Str(&'a str),
}

fn send_command(
    stream: &mut UnixStream,
    id: i32,
    op: Opcode,
    args: &[Arg<'_>],
) -> std::result::Result<(), WireError> {
    wire::write_command(stream, id, op)?;
    for arg in args {
        match arg {
            Arg::Int(v) => wire::write_int(stream, *v)?,
            Arg::Str(s) => wire::write_string(stream, s)?,
        }
    }
    stream.flush()?;
    Ok(())
}

/// Read the reply code and map a non-zero code into the public taxonomy.
fn read_reply(stream: &mut UnixStream) -> Result<()> {
    let code = wire::read_int(stream)?;
    match Error::from_code(code) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

impl Connection {
    /// Run one exchange under the command-channel lock. A timed-out exchange
    /// marks the connection stale so the next command is preceded by a
    /// resync probe.
    fn exchange<T>(&self, run: impl FnOnce(&mut UnixStream) -> Result<T>) -> Result<T> {
        let mut cmd = self.lock_cmd();
        let result = run(&mut cmd);
        if matches!(result, Err(Error::Timeout)) {
            self.mark_stale();
        }
        result
    }

    /// Send a command and read its status reply. Covers every operation
    /// whose reply carries no payload.
    pub fn execute(&self, id: i32, op: Opcode, args: &[Arg<'_>]) -> Result<()> {
        self.exchange(|cmd| {
            send_command(cmd, id, op, args)?;
            read_reply(cmd)
        })
    }

    /// Exchange for getters returning one `i32` payload.
    pub fn execute_int(&self, id: i32, op: Opcode) -> Result<i32> {
        self.exchange(|cmd| {
            send_command(cmd, id, op, &[])?;
            read_reply(cmd)?;
            Ok(wire::read_int(cmd)?)
        })
    }

    /// Exchange for getters returning one `u64` payload.
    pub fn execute_u64(&self, id: i32, op: Opcode) -> Result<u64> {
        self.exchange(|cmd| {
            send_command(cmd, id, op, &[])?;
            read_reply(cmd)?;
            Ok(wire::read_u64(cmd)?)
        })
    }

    /// Exchange for getters returning one string payload. Ownership of the
    /// string transfers to the caller.
    pub fn execute_string(&self, id: i32, op: Opcode, args: &[Arg<'_>]) -> Result<String> {
        self.exchange(|cmd| {
            send_command(cmd, id, op, args)?;
            read_reply(cmd)?;
            Ok(wire::read_string(cmd)?)
        })
    }

    /// CREATE: targets no session; on success the service replies with the
    /// freshly allocated positive session id.
    pub fn create_session(&self) -> Result<i32> {
        self.exchange(|cmd| {
            send_command(cmd, NO_SESSION, Opcode::Create, &[])?;
            read_reply(cmd)?;
            let id = wire::read_int(cmd)?;
            if id <= 0 {
                return Err(Error::Protocol(format!(
                    "service returned session id {}",
                    id
                )));
            }
            Ok(id)
        })
    }

    /// Two-phase release: DESTROY with a reply, then FREE as the release
    /// acknowledgment. FREE has no reply.
    pub fn destroy_session(&self, id: i32) -> Result<()> {
        self.exchange(|cmd| {
            send_command(cmd, id, Opcode::Destroy, &[])?;
            read_reply(cmd)?;
            send_command(cmd, id, Opcode::Free, &[])?;
            Ok(())
        })
    }

    /// Liveness probe: ECHO, then discard any stray unread bytes left over
    /// from a previously timed-out exchange. Best-effort resynchronization,
    /// not a correctness guarantee.
    pub fn ping(&self) -> Result<()> {
        self.exchange(|cmd| {
            send_command(cmd, NO_SESSION, Opcode::Echo, &[])?;
            read_reply(cmd)?;
            drain_stray_bytes(cmd)?;
            Ok(())
        })
    }
}

fn drain_stray_bytes(stream: &mut UnixStream) -> Result<()> {
    stream.set_nonblocking(true)?;

    let mut discarded = 0usize;
    let mut scratch = [0u8; 256];
    let result = loop {
        match stream.read(&mut scratch) {
            Ok(0) => break Ok(()),
            Ok(n) => discarded += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break Ok(()),
            Err(e) => break Err(Error::Io(e)),
        }
    };

    stream.set_nonblocking(false)?;
    if discarded > 0 {
        tracing::debug!("discarded {} stray bytes from command channel", discarded);
    }
    result
}
