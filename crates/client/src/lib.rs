// SPDX-License-Identifier: MIT

//! Client library for the fetchd download service.
//!
//! The service runs downloads out of process; this crate talks to it over a
//! pair of Unix-domain sockets. A [`Client`] lazily opens a command channel
//! for request/reply exchanges plus an event channel that a background
//! thread drains, routing state-change and progress records to the
//! callbacks registered per download.
//!
//! ```no_run
//! use fetch_client::{Client, Config};
//!
//! # fn main() -> fetch_client::Result<()> {
//! let client = Client::new(Config::default());
//! let id = client.create()?;
//! client.set_url(id, "https://example.com/file.bin")?;
//! client.set_state_changed_callback(id, |id, state, _err| {
//!     println!("download {} is now {:?}", id, state);
//! })?;
//! client.start(id)?;
//! # Ok(())
//! # }
//! ```
//!
//! A client holds at most five bound downloads at once;
//! [`Client::create`] fails with [`Error::TooManyDownloads`] when the
//! table is full.

mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod events;
mod slots;

#[cfg(test)]
pub(crate) mod test_support;

pub use fetch_ipc::{ErrorCode, NetworkType, State};

pub use crate::client::Client;
pub use crate::config::Config;
pub use crate::error::{Error, Result};

/// Service-assigned download identifier. Always positive.
pub type DownloadId = i32;

/// Callback invoked on the event thread when a download changes state.
pub type StateCallback = dyn Fn(DownloadId, State, ErrorCode) + Send + Sync;

/// Callback invoked on the event thread as received bytes accumulate.
pub type ProgressCallback = dyn Fn(DownloadId, u64) + Send + Sync;
