// SPDX-License-Identifier: MIT

use fetch_ipc::{ErrorCode, WireError};
use thiserror::Error;

/// All possible errors returned by fetch-client operations.
///
/// Service-reported failures and local validation failures are plain typed
/// values; connectivity failures additionally tear down the connection so
/// that later calls fail fast instead of hanging on a dead socket.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter")]
    InvalidParameter,

    #[error("operation not allowed in the session's current state")]
    InvalidState,

    #[error("download id not found in the service")]
    IdNotFound,

    #[error("all {0} local download slots are in use")]
    TooManyDownloads(usize),

    #[error("service download queue is full")]
    QueueFull,

    #[error("no space left on device")]
    NoSpace,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("connection to the remote server timed out")]
    ConnectionTimedOut,

    #[error("download already completed")]
    AlreadyCompleted,

    #[error("destination file already exists")]
    FileAlreadyExists,

    #[error("download cannot be resumed")]
    CannotResume,

    #[error("http header field not found")]
    FieldNotFound,

    #[error("value has not been set")]
    NoData,

    #[error("invalid url")]
    InvalidUrl,

    #[error("invalid destination path")]
    InvalidDestination,

    #[error("service cannot handle the http status code")]
    UnhandledHttpCode,

    #[error("service is out of memory")]
    OutOfMemory,

    #[error("service internal i/o failure")]
    ServiceIo,

    #[error("service error code {0}")]
    Service(i32),

    #[error("request timed out waiting for the service")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for fetch-client operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map a service-reported error code to the public taxonomy.
    ///
    /// Returns `None` for [`ErrorCode::None`]. Codes the service defines but
    /// this table does not recognize surface as [`Error::Service`].
    pub(crate) fn from_code(code: i32) -> Option<Error> {
        let known = match ErrorCode::from_wire(code) {
            Some(c) => c,
            None => return Some(Error::Service(code)),
        };
        let err = match known {
            ErrorCode::None => return None,
            ErrorCode::InvalidParameter => Error::InvalidParameter,
            ErrorCode::OutOfMemory => Error::OutOfMemory,
            // Service-side i/o failures are session errors, not a problem
            // with our command channel.
            ErrorCode::IoError => Error::ServiceIo,
            ErrorCode::NetworkUnreachable => Error::NetworkUnreachable,
            ErrorCode::NoSpace => Error::NoSpace,
            ErrorCode::FieldNotFound => Error::FieldNotFound,
            ErrorCode::InvalidState => Error::InvalidState,
            ErrorCode::ConnectionFailed => Error::ConnectionTimedOut,
            ErrorCode::InvalidUrl => Error::InvalidUrl,
            ErrorCode::InvalidDestination => Error::InvalidDestination,
            ErrorCode::QueueFull => Error::QueueFull,
            ErrorCode::AlreadyCompleted => Error::AlreadyCompleted,
            ErrorCode::FileAlreadyExists => Error::FileAlreadyExists,
            ErrorCode::TooManyDownloads => Error::TooManyDownloads(crate::slots::MAX_SESSIONS),
            ErrorCode::NoData => Error::NoData,
            ErrorCode::UnhandledHttpCode => Error::UnhandledHttpCode,
            ErrorCode::CannotResume => Error::CannotResume,
            ErrorCode::IdNotFound => Error::IdNotFound,
            // The service's catch-all code surfaces as the invalid-state
            // error.
            ErrorCode::Unknown => Error::InvalidState,
        };
        Some(err)
    }

    /// True when the error means the command channel can no longer be
    /// trusted and the whole connection must be torn down.
    ///
    /// A bare timeout is retryable and keeps the connection; everything else
    /// that touches the stream desynchronizes it.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol(_))
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        if e.is_timeout() {
            return Error::Timeout;
        }
        match e {
            WireError::Io(io) => Error::Io(io),
            WireError::Protocol(msg) => Error::Protocol(msg),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
