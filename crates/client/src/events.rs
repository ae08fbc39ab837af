// SPDX-License-Identifier: MIT

//! Event dispatch thread.
//!
//! One background thread per connection blocks on the event channel, decodes
//! records, and routes each to the callbacks bound in the slot table. The
//! stop flag is checked only at the top of the loop; callbacks always run
//! with every library lock released, so a callback may re-enter the client
//! and teardown can never interrupt a callback mid-flight.

use std::sync::{Arc, Weak};

use fetch_ipc::{wire, ErrorCode, State};

use crate::client::Inner;
use crate::connection::Connection;
use crate::error::Result;

pub(crate) fn spawn(inner: Weak<Inner>, conn: Arc<Connection>) -> Result<()> {
    std::thread::Builder::new()
        .name("fetch-events".to_string())
        .spawn(move || run(inner, conn))?;
    Ok(())
}

fn run(inner: Weak<Inner>, conn: Arc<Connection>) {
    let mut stream = conn.event_stream();

    loop {
        // Sole cancellation point: a stop requested while a callback was
        // running is honored here, never mid-callback.
        if conn.is_stopping() {
            return;
        }

        let record = match wire::read_event(&mut stream) {
            Ok(record) => record,
            Err(e) => {
                if conn.is_stopping() {
                    return;
                }
                tracing::warn!("event channel failed: {}", e);
                break;
            }
        };

        if record.id <= 0 {
            tracing::warn!("event with invalid session id {}", record.id);
            break;
        }

        let Some(client) = inner.upgrade() else {
            return;
        };

        let callbacks = {
            let state = client.lock_state();
            if !state.owns(&conn) {
                // Superseded by a newer connection; this thread is done.
                return;
            }
            state.slots.callbacks(record.id)
        };

        let Some((state_cb, progress_cb)) = callbacks else {
            tracing::debug!("no slot bound for session {}", record.id);
            continue;
        };

        // Routing is strictly by event kind: byte-count updates go to the
        // progress callback, everything else to the state callback.
        if record.state == State::Downloading.to_wire() && record.received_size > 0 {
            if let Some(cb) = progress_cb {
                cb(record.id, record.received_size);
            }
        } else if let Some(state) = State::from_wire(record.state) {
            if let Some(cb) = state_cb {
                let err = ErrorCode::from_wire(record.err).unwrap_or(ErrorCode::Unknown);
                cb(record.id, state, err);
            }
        } else {
            // Fixed-size records keep the stream aligned even when the
            // state code is unrecognized.
            tracing::warn!("skipping event with unknown state code {}", record.state);
        }
    }

    // The channel broke under us: initiate teardown so a half-dead
    // connection never lingers in the slot table.
    if let Some(client) = inner.upgrade() {
        let mut state = client.lock_state();
        if state.owns(&conn) {
            tracing::debug!("event thread tearing down broken connection");
            state.teardown();
        }
    }
}
