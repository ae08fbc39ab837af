// SPDX-License-Identifier: MIT

//! Wire protocol shared between fetchd clients and the fetchd service.
//!
//! The protocol runs over two Unix-domain stream sockets: a command channel
//! carrying synchronous request/reply exchanges, and an event channel carrying
//! unsolicited push records. All integers on the wire are explicit
//! little-endian; strings are length-prefixed UTF-8 with no terminator.
//!
//! Frame layouts:
//! - command header: `id: i32` + `opcode: i32` (8 bytes)
//! - string: `len: u32` + `len` raw bytes, `1 ..= MAX_STR_LEN`
//! - reply: one `i32` service error code, then an opcode-specific payload
//! - event record: `id: i32` + `state: i32` + `err: i32` + `received: u64`
//!   (20 bytes, read as one unit)

use thiserror::Error;

/// Upper bound for length-prefixed strings on the wire.
pub const MAX_STR_LEN: usize = 4096;

/// Size of one event record on the wire.
pub const EVENT_RECORD_LEN: usize = 20;

/// Session id used for commands that target no session (CREATE, ECHO).
pub const NO_SESSION: i32 = -1;

/// Error raised by the wire codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// Stream-level failure: write error, short read, peer closed, timeout.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a frame the codec cannot accept. The stream must be
    /// assumed desynchronized after this.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl WireError {
    /// True when the underlying failure is a socket timeout rather than a
    /// hard disconnect.
    pub fn is_timeout(&self) -> bool {
        match self {
            WireError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            WireError::Protocol(_) => false,
        }
    }
}

/// Role declaration sent once on each freshly connected channel, followed by
/// the sender's process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// This connection carries request/reply exchanges.
    Command,
    /// This connection carries unsolicited event records.
    Event,
}

impl ChannelRole {
    pub fn to_wire(self) -> i32 {
        match self {
            ChannelRole::Command => 0x301,
            ChannelRole::Event => 0x302,
        }
    }

    pub fn from_wire(value: i32) -> Option<ChannelRole> {
        match value {
            0x301 => Some(ChannelRole::Command),
            0x302 => Some(ChannelRole::Event),
            _ => None,
        }
    }
}

/// Command opcodes understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Create,
    Destroy,
    Free,
    Start,
    Pause,
    Cancel,
    Echo,
    SetUrl,
    GetUrl,
    SetDestination,
    GetDestination,
    SetFileName,
    GetFileName,
    SetNetworkType,
    GetNetworkType,
    SetNetworkBonding,
    GetNetworkBonding,
    SetAutoDownload,
    GetAutoDownload,
    SetHttpHeader,
    GetHttpHeader,
    DelHttpHeader,
    SetStateCallback,
    SetProgressCallback,
    GetState,
    GetError,
    GetHttpStatus,
    GetTempPath,
    GetContentName,
    GetTotalFileSize,
    GetMimeType,
}

impl Opcode {
    pub fn to_wire(self) -> i32 {
        match self {
            Opcode::Create => 1,
            Opcode::Destroy => 2,
            Opcode::Free => 3,
            Opcode::Start => 4,
            Opcode::Pause => 5,
            Opcode::Cancel => 6,
            Opcode::Echo => 7,
            Opcode::SetUrl => 16,
            Opcode::GetUrl => 17,
            Opcode::SetDestination => 18,
            Opcode::GetDestination => 19,
            Opcode::SetFileName => 20,
            Opcode::GetFileName => 21,
            Opcode::SetNetworkType => 22,
            Opcode::GetNetworkType => 23,
            Opcode::SetNetworkBonding => 24,
            Opcode::GetNetworkBonding => 25,
            Opcode::SetAutoDownload => 26,
            Opcode::GetAutoDownload => 27,
            Opcode::SetHttpHeader => 32,
            Opcode::GetHttpHeader => 33,
            Opcode::DelHttpHeader => 34,
            Opcode::SetStateCallback => 40,
            Opcode::SetProgressCallback => 41,
            Opcode::GetState => 48,
            Opcode::GetError => 49,
            Opcode::GetHttpStatus => 50,
            Opcode::GetTempPath => 51,
            Opcode::GetContentName => 52,
            Opcode::GetTotalFileSize => 53,
            Opcode::GetMimeType => 54,
        }
    }

    pub fn from_wire(value: i32) -> Option<Opcode> {
        let op = match value {
            1 => Opcode::Create,
            2 => Opcode::Destroy,
            3 => Opcode::Free,
            4 => Opcode::Start,
            5 => Opcode::Pause,
            6 => Opcode::Cancel,
            7 => Opcode::Echo,
            16 => Opcode::SetUrl,
            17 => Opcode::GetUrl,
            18 => Opcode::SetDestination,
            19 => Opcode::GetDestination,
            20 => Opcode::SetFileName,
            21 => Opcode::GetFileName,
            22 => Opcode::SetNetworkType,
            23 => Opcode::GetNetworkType,
            24 => Opcode::SetNetworkBonding,
            25 => Opcode::GetNetworkBonding,
            26 => Opcode::SetAutoDownload,
            27 => Opcode::GetAutoDownload,
            32 => Opcode::SetHttpHeader,
            33 => Opcode::GetHttpHeader,
            34 => Opcode::DelHttpHeader,
            40 => Opcode::SetStateCallback,
            41 => Opcode::SetProgressCallback,
            48 => Opcode::GetState,
            49 => Opcode::GetError,
            50 => Opcode::GetHttpStatus,
            51 => Opcode::GetTempPath,
            52 => Opcode::GetContentName,
            53 => Opcode::GetTotalFileSize,
            54 => Opcode::GetMimeType,
            _ => return None,
        };
        Some(op)
    }
}

/// Error codes returned by the service in replies and event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None,
    InvalidParameter,
    OutOfMemory,
    IoError,
    NetworkUnreachable,
    NoSpace,
    FieldNotFound,
    InvalidState,
    ConnectionFailed,
    InvalidUrl,
    InvalidDestination,
    QueueFull,
    AlreadyCompleted,
    FileAlreadyExists,
    TooManyDownloads,
    NoData,
    UnhandledHttpCode,
    CannotResume,
    IdNotFound,
    Unknown,
}

impl ErrorCode {
    pub fn to_wire(self) -> i32 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::InvalidParameter => 10,
            ErrorCode::OutOfMemory => 11,
            ErrorCode::IoError => 12,
            ErrorCode::NetworkUnreachable => 13,
            ErrorCode::NoSpace => 14,
            ErrorCode::FieldNotFound => 15,
            ErrorCode::InvalidState => 16,
            ErrorCode::ConnectionFailed => 17,
            ErrorCode::InvalidUrl => 18,
            ErrorCode::InvalidDestination => 19,
            ErrorCode::QueueFull => 20,
            ErrorCode::AlreadyCompleted => 21,
            ErrorCode::FileAlreadyExists => 22,
            ErrorCode::TooManyDownloads => 23,
            ErrorCode::NoData => 24,
            ErrorCode::UnhandledHttpCode => 25,
            ErrorCode::CannotResume => 26,
            ErrorCode::IdNotFound => 27,
            ErrorCode::Unknown => 28,
        }
    }

    pub fn from_wire(value: i32) -> Option<ErrorCode> {
        let code = match value {
            0 => ErrorCode::None,
            10 => ErrorCode::InvalidParameter,
            11 => ErrorCode::OutOfMemory,
            12 => ErrorCode::IoError,
            13 => ErrorCode::NetworkUnreachable,
            14 => ErrorCode::NoSpace,
            15 => ErrorCode::FieldNotFound,
            16 => ErrorCode::InvalidState,
            17 => ErrorCode::ConnectionFailed,
            18 => ErrorCode::InvalidUrl,
            19 => ErrorCode::InvalidDestination,
            20 => ErrorCode::QueueFull,
            21 => ErrorCode::AlreadyCompleted,
            22 => ErrorCode::FileAlreadyExists,
            23 => ErrorCode::TooManyDownloads,
            24 => ErrorCode::NoData,
            25 => ErrorCode::UnhandledHttpCode,
            26 => ErrorCode::CannotResume,
            27 => ErrorCode::IdNotFound,
            28 => ErrorCode::Unknown,
            _ => return None,
        };
        Some(code)
    }
}

/// Lifecycle state of a download session, as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created and configurable; not yet started.
    Ready,
    /// Accepted for transfer, waiting for a transfer slot.
    Queued,
    /// Transfer is running.
    Downloading,
    /// Transfer suspended; resumable via start.
    Paused,
    /// Transfer finished successfully.
    Completed,
    /// Transfer failed; the session's error code says why.
    Failed,
    /// Transfer canceled by the client.
    Canceled,
}

impl State {
    pub fn to_wire(self) -> i32 {
        match self {
            State::Ready => 1,
            State::Queued => 2,
            State::Downloading => 3,
            State::Paused => 4,
            State::Completed => 5,
            State::Failed => 6,
            State::Canceled => 7,
        }
    }

    pub fn from_wire(value: i32) -> Option<State> {
        let state = match value {
            1 => State::Ready,
            2 => State::Queued,
            3 => State::Downloading,
            4 => State::Paused,
            5 => State::Completed,
            6 => State::Failed,
            7 => State::Canceled,
            _ => return None,
        };
        Some(state)
    }
}

/// Network constraint for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkType {
    /// Any available network.
    #[default]
    All,
    /// Cellular data only.
    DataNetwork,
    /// Wi-Fi only.
    Wifi,
}

impl NetworkType {
    pub fn to_wire(self) -> i32 {
        match self {
            NetworkType::All => 0,
            NetworkType::DataNetwork => 1,
            NetworkType::Wifi => 2,
        }
    }

    /// Unrecognized values fall back to [`NetworkType::All`].
    pub fn from_wire(value: i32) -> NetworkType {
        match value {
            1 => NetworkType::DataNetwork,
            2 => NetworkType::Wifi,
            _ => NetworkType::All,
        }
    }
}

/// One unsolicited record pushed by the service on the event channel.
///
/// `state` and `err` are kept as raw wire values; the receiver decides how to
/// decode them so an unknown code never desynchronizes the stream (the record
/// is fixed-size either way).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub id: i32,
    pub state: i32,
    pub err: i32,
    pub received_size: u64,
}

/// Stream-level encode/decode of protocol frames.
///
/// Every multi-field frame is written and read in a strict order; a short
/// read is always an error, never retried here. Callers own the decision to
/// reconnect.
pub mod wire {
    use std::io::{Read, Write};

    use super::{EventRecord, Opcode, WireError, EVENT_RECORD_LEN, MAX_STR_LEN};

    /// Write the fixed-size command header: session id, then opcode.
    pub fn write_command<W: Write>(w: &mut W, id: i32, op: Opcode) -> Result<(), WireError> {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&id.to_le_bytes());
        buf[4..].copy_from_slice(&op.to_wire().to_le_bytes());
        w.write_all(&buf)?;
        Ok(())
    }

    /// Write one raw `i32` value.
    pub fn write_int<W: Write>(w: &mut W, value: i32) -> Result<(), WireError> {
        w.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Write a length-prefixed string. Empty and over-limit strings are
    /// protocol errors; nothing is written for them.
    pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), WireError> {
        let bytes = s.as_bytes();
        if bytes.is_empty() {
            return Err(WireError::Protocol("empty string".to_string()));
        }
        if bytes.len() > MAX_STR_LEN {
            return Err(WireError::Protocol(format!(
                "string too long: {} bytes (max {})",
                bytes.len(),
                MAX_STR_LEN
            )));
        }
        let len = bytes.len() as u32;
        w.write_all(&len.to_le_bytes())?;
        w.write_all(bytes)?;
        Ok(())
    }

    /// Read one raw `i32` value.
    pub fn read_int<R: Read>(r: &mut R) -> Result<i32, WireError> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read one raw `u64` value.
    pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, WireError> {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a length-prefixed UTF-8 string, validating the length bounds
    /// before allocating.
    pub fn read_string<R: Read>(r: &mut R) -> Result<String, WireError> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        if len == 0 || len > MAX_STR_LEN {
            return Err(WireError::Protocol(format!(
                "invalid string length: {} (max {})",
                len, MAX_STR_LEN
            )));
        }

        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;

        String::from_utf8(buf).map_err(|e| WireError::Protocol(format!("invalid utf-8: {}", e)))
    }

    /// Read one fixed-size event record as a single unit.
    pub fn read_event<R: Read>(r: &mut R) -> Result<EventRecord, WireError> {
        let mut buf = [0u8; EVENT_RECORD_LEN];
        r.read_exact(&mut buf)?;

        let mut int = [0u8; 4];
        int.copy_from_slice(&buf[..4]);
        let id = i32::from_le_bytes(int);
        int.copy_from_slice(&buf[4..8]);
        let state = i32::from_le_bytes(int);
        int.copy_from_slice(&buf[8..12]);
        let err = i32::from_le_bytes(int);
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[12..]);
        let received_size = u64::from_le_bytes(size);

        Ok(EventRecord {
            id,
            state,
            err,
            received_size,
        })
    }

    /// Write one event record (used by the service side and test doubles).
    pub fn write_event<W: Write>(w: &mut W, event: &EventRecord) -> Result<(), WireError> {
        let mut buf = [0u8; EVENT_RECORD_LEN];
        buf[..4].copy_from_slice(&event.id.to_le_bytes());
        buf[4..8].copy_from_slice(&event.state.to_le_bytes());
        buf[8..12].copy_from_slice(&event.err.to_le_bytes());
        buf[12..].copy_from_slice(&event.received_size.to_le_bytes());
        w.write_all(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
