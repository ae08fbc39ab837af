// SPDX-License-Identifier: MIT

//! Public session API.
//!
//! Every operation takes the session lock, lazily (re)establishes the
//! connection, performs exactly one command exchange, and updates the slot
//! table where relevant. A fatal wire failure tears the whole connection
//! down so later calls fail fast instead of reading a desynchronized stream.

use std::sync::{Arc, Mutex, MutexGuard};

use fetch_ipc::{ErrorCode, NetworkType, Opcode, State, MAX_STR_LEN};

use crate::config::Config;
use crate::connection::Connection;
use crate::dispatch::Arg;
use crate::error::{Error, Result};
use crate::events;
use crate::slots::{SlotTable, MAX_SESSIONS};
use crate::DownloadId;

/// Handle to the download service.
///
/// Cheap to clone; all clones share one connection pair and one slot table.
/// Independent [`Client`] values are fully independent of each other.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: Config,
    state: Mutex<ClientState>,
}

/// Everything guarded by the session lock: the connection handle and the
/// slot table, and nothing else.
pub(crate) struct ClientState {
    conn: Option<Arc<Connection>>,
    pub(crate) slots: SlotTable,
}

impl ClientState {
    /// True when `conn` is still the connection this client owns. The event
    /// thread uses this to detect that it has been superseded.
    pub fn owns(&self, conn: &Arc<Connection>) -> bool {
        self.conn.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn))
    }

    /// Drop the connection and every slot binding. Callbacks are not
    /// re-armed after a reconnect; re-registration is the caller's job.
    pub fn teardown(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.request_stop();
        }
        self.slots.clear_all();
    }
}

impl Inner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.lock_state().teardown();
    }
}

impl Client {
    /// Create a client for the service described by `config`. No connection
    /// is made until the first operation needs one.
    pub fn new(config: Config) -> Self {
        Client {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ClientState {
                    conn: None,
                    slots: SlotTable::new(),
                }),
            }),
        }
    }

    /// Idempotent: reuses a healthy connection, otherwise opens both
    /// channels and starts the event thread for them. Exactly one event
    /// thread exists per connection because this is the only place one is
    /// spawned, always under the session lock.
    fn ensure_connected(&self, state: &mut ClientState) -> Result<Arc<Connection>> {
        if let Some(conn) = state.conn.clone() {
            if !conn.take_stale() {
                return Ok(conn);
            }
            // A previous exchange timed out; probe the channel and discard
            // whatever the late reply left behind before reusing it.
            match conn.ping() {
                Ok(()) => return Ok(conn),
                Err(err) if err.is_fatal() => {
                    tracing::warn!("resync probe failed, reconnecting: {}", err);
                    state.teardown();
                }
                Err(_) => {
                    conn.mark_stale();
                    return Ok(conn);
                }
            }
        }
        let conn = Connection::open(&self.inner.config)?;
        events::spawn(Arc::downgrade(&self.inner), conn.clone())?;
        state.conn = Some(conn.clone());
        Ok(conn)
    }

    /// Tear down on fatal wire errors; service errors and bare timeouts
    /// leave the connection alone.
    fn note_fatal<T>(state: &mut ClientState, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::warn!("connection failed, tearing down: {}", err);
                state.teardown();
            }
        }
        result
    }

    /// Common path: lock, connect if needed, run one exchange.
    fn command<T>(&self, exchange: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut state = self.inner.lock_state();
        let conn = self.ensure_connected(&mut state)?;
        Self::note_fatal(&mut state, exchange(&conn))
    }

    // ---- lifecycle ----------------------------------------------------

    /// Allocate a new download session. The returned id is in state
    /// [`State::Ready`] and occupies one of the client's fixed slots.
    pub fn create(&self) -> Result<DownloadId> {
        let mut state = self.inner.lock_state();
        // Fail before any I/O when no slot could hold the result.
        if state.slots.is_full() {
            return Err(Error::TooManyDownloads(MAX_SESSIONS));
        }
        let conn = self.ensure_connected(&mut state)?;
        let id = Self::note_fatal(&mut state, conn.create_session())?;
        state.slots.allocate(id)?;
        Ok(id)
    }

    /// Release the session locally and in the service. Safe to call for ids
    /// that never had a slot; an id unknown to the service yields
    /// [`Error::IdNotFound`].
    pub fn destroy(&self, id: DownloadId) -> Result<()> {
        validate_id(id)?;
        let mut state = self.inner.lock_state();
        state.slots.clear(id);
        let conn = self.ensure_connected(&mut state)?;
        Self::note_fatal(&mut state, conn.destroy_session(id))
    }

    /// Queue the download for transfer. Also restarts sessions that ended
    /// in [`State::Failed`] or [`State::Canceled`].
    pub fn start(&self, id: DownloadId) -> Result<()> {
        validate_id(id)?;
        self.command(|conn| conn.execute(id, Opcode::Start, &[]))
    }

    pub fn pause(&self, id: DownloadId) -> Result<()> {
        validate_id(id)?;
        self.command(|conn| conn.execute(id, Opcode::Pause, &[]))
    }

    pub fn cancel(&self, id: DownloadId) -> Result<()> {
        validate_id(id)?;
        self.command(|conn| conn.execute(id, Opcode::Cancel, &[]))
    }

    /// Probe service liveness over the command channel and discard any
    /// stray bytes left by a previously timed-out exchange.
    pub fn ping(&self) -> Result<()> {
        self.command(|conn| conn.ping())
    }

    /// Close both channels, stop the event thread, and clear every slot.
    /// Idempotent; safe without a prior connection.
    pub fn disconnect(&self) {
        self.inner.lock_state().teardown();
    }

    // ---- configuration ------------------------------------------------

    pub fn set_url(&self, id: DownloadId, url: &str) -> Result<()> {
        validate_id(id)?;
        validate_str(url)?;
        self.command(|conn| conn.execute(id, Opcode::SetUrl, &[Arg::Str(url)]))
    }

    pub fn url(&self, id: DownloadId) -> Result<String> {
        validate_id(id)?;
        self.command(|conn| conn.execute_string(id, Opcode::GetUrl, &[]))
    }

    pub fn set_destination(&self, id: DownloadId, path: &str) -> Result<()> {
        validate_id(id)?;
        validate_str(path)?;
        self.command(|conn| conn.execute(id, Opcode::SetDestination, &[Arg::Str(path)]))
    }

    pub fn destination(&self, id: DownloadId) -> Result<String> {
        validate_id(id)?;
        self.command(|conn| conn.execute_string(id, Opcode::GetDestination, &[]))
    }

    pub fn set_file_name(&self, id: DownloadId, name: &str) -> Result<()> {
        validate_id(id)?;
        validate_str(name)?;
        self.command(|conn| conn.execute(id, Opcode::SetFileName, &[Arg::Str(name)]))
    }

    pub fn file_name(&self, id: DownloadId) -> Result<String> {
        validate_id(id)?;
        self.command(|conn| conn.execute_string(id, Opcode::GetFileName, &[]))
    }

    pub fn set_network_type(&self, id: DownloadId, network: NetworkType) -> Result<()> {
        validate_id(id)?;
        self.command(|conn| {
            conn.execute(id, Opcode::SetNetworkType, &[Arg::Int(network.to_wire())])
        })
    }

    pub fn network_type(&self, id: DownloadId) -> Result<NetworkType> {
        validate_id(id)?;
        self.command(|conn| {
            let value = conn.execute_int(id, Opcode::GetNetworkType)?;
            Ok(NetworkType::from_wire(value))
        })
    }

    pub fn set_network_bonding(&self, id: DownloadId, enable: bool) -> Result<()> {
        validate_id(id)?;
        self.command(|conn| {
            conn.execute(id, Opcode::SetNetworkBonding, &[Arg::Int(enable as i32)])
        })
    }

    pub fn network_bonding(&self, id: DownloadId) -> Result<bool> {
        validate_id(id)?;
        self.command(|conn| Ok(conn.execute_int(id, Opcode::GetNetworkBonding)? != 0))
    }

    pub fn set_auto_download(&self, id: DownloadId, enable: bool) -> Result<()> {
        validate_id(id)?;
        self.command(|conn| conn.execute(id, Opcode::SetAutoDownload, &[Arg::Int(enable as i32)]))
    }

    pub fn auto_download(&self, id: DownloadId) -> Result<bool> {
        validate_id(id)?;
        self.command(|conn| Ok(conn.execute_int(id, Opcode::GetAutoDownload)? != 0))
    }

    // ---- http headers -------------------------------------------------

    pub fn add_http_header_field(&self, id: DownloadId, field: &str, value: &str) -> Result<()> {
        validate_id(id)?;
        validate_str(field)?;
        validate_str(value)?;
        self.command(|conn| {
            conn.execute(id, Opcode::SetHttpHeader, &[Arg::Str(field), Arg::Str(value)])
        })
    }

    pub fn http_header_field(&self, id: DownloadId, field: &str) -> Result<String> {
        validate_id(id)?;
        validate_str(field)?;
        self.command(|conn| conn.execute_string(id, Opcode::GetHttpHeader, &[Arg::Str(field)]))
    }

    pub fn remove_http_header_field(&self, id: DownloadId, field: &str) -> Result<()> {
        validate_id(id)?;
        validate_str(field)?;
        self.command(|conn| conn.execute(id, Opcode::DelHttpHeader, &[Arg::Str(field)]))
    }

    // ---- callbacks ----------------------------------------------------

    /// Register a state-change callback, binding a slot for `id` if it has
    /// none, and tell the service to push state events for this session.
    ///
    /// The callback runs on the event thread with no library lock held, so
    /// it may call back into this client.
    pub fn set_state_changed_callback<F>(&self, id: DownloadId, callback: F) -> Result<()>
    where
        F: Fn(DownloadId, State, ErrorCode) + Send + Sync + 'static,
    {
        validate_id(id)?;
        let mut state = self.inner.lock_state();
        let existed = state.slots.find(id).is_some();
        let index = state.slots.allocate(id)?;
        let result = self.ensure_connected(&mut state).and_then(|conn| {
            Self::note_fatal(
                &mut state,
                conn.execute(id, Opcode::SetStateCallback, &[Arg::Int(1)]),
            )
        });
        match result {
            Ok(()) => {
                if let Some(slot) = state.slots.slot_mut(index) {
                    slot.state_cb = Some(Arc::new(callback));
                }
                Ok(())
            }
            Err(e) => {
                // Roll back a binding this call created.
                if !existed {
                    state.slots.clear(id);
                }
                Err(e)
            }
        }
    }

    /// Drop the local state callback and tell the service to stop pushing
    /// state events. The slot itself stays bound until destroy.
    pub fn unset_state_changed_callback(&self, id: DownloadId) -> Result<()> {
        validate_id(id)?;
        let mut state = self.inner.lock_state();
        if let Some(index) = state.slots.find(id) {
            if let Some(slot) = state.slots.slot_mut(index) {
                slot.state_cb = None;
            }
        }
        let conn = self.ensure_connected(&mut state)?;
        Self::note_fatal(
            &mut state,
            conn.execute(id, Opcode::SetStateCallback, &[Arg::Int(0)]),
        )
    }

    /// Register a progress callback; same contract as
    /// [`set_state_changed_callback`](Client::set_state_changed_callback).
    pub fn set_progress_callback<F>(&self, id: DownloadId, callback: F) -> Result<()>
    where
        F: Fn(DownloadId, u64) + Send + Sync + 'static,
    {
        validate_id(id)?;
        let mut state = self.inner.lock_state();
        let existed = state.slots.find(id).is_some();
        let index = state.slots.allocate(id)?;
        let result = self.ensure_connected(&mut state).and_then(|conn| {
            Self::note_fatal(
                &mut state,
                conn.execute(id, Opcode::SetProgressCallback, &[Arg::Int(1)]),
            )
        });
        match result {
            Ok(()) => {
                if let Some(slot) = state.slots.slot_mut(index) {
                    slot.progress_cb = Some(Arc::new(callback));
                }
                Ok(())
            }
            Err(e) => {
                // Roll back a binding this call created.
                if !existed {
                    state.slots.clear(id);
                }
                Err(e)
            }
        }
    }

    pub fn unset_progress_callback(&self, id: DownloadId) -> Result<()> {
        validate_id(id)?;
        let mut state = self.inner.lock_state();
        if let Some(index) = state.slots.find(id) {
            if let Some(slot) = state.slots.slot_mut(index) {
                slot.progress_cb = None;
            }
        }
        let conn = self.ensure_connected(&mut state)?;
        Self::note_fatal(
            &mut state,
            conn.execute(id, Opcode::SetProgressCallback, &[Arg::Int(0)]),
        )
    }

    // ---- getters ------------------------------------------------------

    /// Current state as reported by the service. The service is
    /// authoritative; the client caches nothing.
    pub fn state(&self, id: DownloadId) -> Result<State> {
        validate_id(id)?;
        self.command(|conn| {
            let value = conn.execute_int(id, Opcode::GetState)?;
            State::from_wire(value)
                .ok_or_else(|| Error::Protocol(format!("unknown state code {}", value)))
        })
    }

    /// The session's last error code, [`ErrorCode::None`] when it has none.
    pub fn error(&self, id: DownloadId) -> Result<ErrorCode> {
        validate_id(id)?;
        self.command(|conn| {
            let value = conn.execute_int(id, Opcode::GetError)?;
            ErrorCode::from_wire(value)
                .ok_or_else(|| Error::Protocol(format!("unknown error code {}", value)))
        })
    }

    pub fn http_status(&self, id: DownloadId) -> Result<i32> {
        validate_id(id)?;
        self.command(|conn| conn.execute_int(id, Opcode::GetHttpStatus))
    }

    pub fn temp_path(&self, id: DownloadId) -> Result<String> {
        validate_id(id)?;
        self.command(|conn| conn.execute_string(id, Opcode::GetTempPath, &[]))
    }

    pub fn content_name(&self, id: DownloadId) -> Result<String> {
        validate_id(id)?;
        self.command(|conn| conn.execute_string(id, Opcode::GetContentName, &[]))
    }

    pub fn content_size(&self, id: DownloadId) -> Result<u64> {
        validate_id(id)?;
        self.command(|conn| conn.execute_u64(id, Opcode::GetTotalFileSize))
    }

    pub fn mime_type(&self, id: DownloadId) -> Result<String> {
        validate_id(id)?;
        self.command(|conn| conn.execute_string(id, Opcode::GetMimeType, &[]))
    }
}

/// Session ids are positive; anything else is rejected before touching the
/// wire.
fn validate_id(id: DownloadId) -> Result<()> {
    if id <= 0 {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

/// Required strings must be non-empty and within the wire limit.
fn validate_str(s: &str) -> Result<()> {
    if s.is_empty() || s.len() > MAX_STR_LEN {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
