// SPDX-License-Identifier: MIT

//! In-process stand-in for the fetchd service, used by the client tests.
//!
//! Binds a real Unix socket in a temp directory, performs the role
//! handshake on each accepted channel, and answers commands from a small
//! in-memory session table. Events are pushed only when a test asks for
//! them, so tests control exactly what the event thread sees.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use fetch_ipc::{wire, ChannelRole, ErrorCode, EventRecord, Opcode, State};

pub(crate) struct FakeProvider {
    socket_path: PathBuf,
    shared: Arc<Shared>,
    // Held for the socket's lifetime; the directory vanishes on drop.
    _dir: tempfile::TempDir,
}

struct Shared {
    state: Mutex<ProviderState>,
    event_ready: Condvar,
}

struct ProviderState {
    event_stream: Option<UnixStream>,
    sessions: HashMap<i32, Session>,
    next_id: i32,
    reply_delay: Duration,
}

#[derive(Default)]
struct Session {
    url: Option<String>,
    destination: Option<String>,
    file_name: Option<String>,
    network_type: i32,
    network_bonding: bool,
    auto_download: bool,
    headers: HashMap<String, String>,
    state: i32,
}

/// Route library logs through the test harness; `RUST_LOG` filters them.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

impl FakeProvider {
    pub fn start() -> FakeProvider {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("fetchd.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let shared = Arc::new(Shared {
            state: Mutex::new(ProviderState {
                event_stream: None,
                sessions: HashMap::new(),
                next_id: 1,
                reply_delay: Duration::ZERO,
            }),
            event_ready: Condvar::new(),
        });

        let accept_shared = shared.clone();
        std::thread::spawn(move || accept_loop(listener, accept_shared));

        FakeProvider {
            socket_path,
            shared,
            _dir: dir,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Delay every reply by `delay`; used to trigger client-side timeouts.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.shared.state.lock().unwrap().reply_delay = delay;
    }

    pub fn session_count(&self) -> usize {
        self.shared.state.lock().unwrap().sessions.len()
    }

    pub fn session_state(&self, id: i32) -> Option<State> {
        let state = self.shared.state.lock().unwrap();
        state.sessions.get(&id).and_then(|s| State::from_wire(s.state))
    }

    /// Push one raw event record, waiting (bounded) for the client's event
    /// channel to be connected first.
    pub fn push_raw_event(&self, id: i32, state: i32, err: i32, received_size: u64) {
        let mut guard = self.shared.state.lock().unwrap();
        while guard.event_stream.is_none() {
            let (next, timeout) = self
                .shared
                .event_ready
                .wait_timeout(guard, Duration::from_secs(5))
                .unwrap();
            assert!(!timeout.timed_out(), "event channel never connected");
            guard = next;
        }
        let mut stream = guard.event_stream.as_ref().unwrap();
        wire::write_event(
            &mut stream,
            &EventRecord {
                id,
                state,
                err,
                received_size,
            },
        )
        .unwrap();
        stream.flush().unwrap();
    }

    pub fn push_event(&self, id: i32, state: State, err: ErrorCode, received_size: u64) {
        self.push_raw_event(id, state.to_wire(), err.to_wire(), received_size);
    }

    /// Sever the event channel to simulate a service crash.
    pub fn drop_event_channel(&self) {
        let mut guard = self.shared.state.lock().unwrap();
        if let Some(stream) = guard.event_stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn accept_loop(listener: UnixListener, shared: Arc<Shared>) {
    while let Ok((mut stream, _)) = listener.accept() {
        let role = match wire::read_int(&mut stream) {
            Ok(value) => value,
            Err(_) => continue,
        };
        // Second handshake field: the client's pid. Read and discarded.
        if wire::read_int(&mut stream).is_err() {
            continue;
        }

        match ChannelRole::from_wire(role) {
            Some(ChannelRole::Command) => {
                let shared = shared.clone();
                std::thread::spawn(move || command_loop(stream, shared));
            }
            Some(ChannelRole::Event) => {
                let mut guard = shared.state.lock().unwrap();
                guard.event_stream = Some(stream);
                shared.event_ready.notify_all();
            }
            None => {}
        }
    }
}

fn command_loop(mut stream: UnixStream, shared: Arc<Shared>) {
    loop {
        let id = match wire::read_int(&mut stream) {
            Ok(value) => value,
            Err(_) => return,
        };
        let Ok(op_raw) = wire::read_int(&mut stream) else {
            return;
        };
        let Some(op) = Opcode::from_wire(op_raw) else {
            return;
        };

        if handle_command(&mut stream, &shared, id, op).is_err() {
            return;
        }
    }
}

type WireResult = Result<(), fetch_ipc::WireError>;

fn handle_command(
    stream: &mut UnixStream,
    shared: &Shared,
    id: i32,
    op: Opcode,
) -> WireResult {
    // Arguments are always consumed before touching the session table so
    // the stream stays aligned even for unknown ids.
    let mut str_args = Vec::new();
    let mut int_arg = None;
    match op {
        Opcode::SetUrl | Opcode::SetDestination | Opcode::SetFileName => {
            str_args.push(wire::read_string(stream)?);
        }
        Opcode::SetHttpHeader => {
            str_args.push(wire::read_string(stream)?);
            str_args.push(wire::read_string(stream)?);
        }
        Opcode::GetHttpHeader | Opcode::DelHttpHeader => {
            str_args.push(wire::read_string(stream)?);
        }
        Opcode::SetNetworkType
        | Opcode::SetNetworkBonding
        | Opcode::SetAutoDownload
        | Opcode::SetStateCallback
        | Opcode::SetProgressCallback => {
            int_arg = Some(wire::read_int(stream)?);
        }
        _ => {}
    }

    let delay = shared.state.lock().unwrap().reply_delay;
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }

    let mut state = shared.state.lock().unwrap();

    // Session-less commands first.
    match op {
        Opcode::Create => {
            let new_id = state.next_id;
            state.next_id += 1;
            state.sessions.insert(
                new_id,
                Session {
                    state: State::Ready.to_wire(),
                    ..Session::default()
                },
            );
            reply_ok(stream)?;
            return wire::write_int(stream, new_id);
        }
        Opcode::Echo => return reply_ok(stream),
        Opcode::Free => {
            // Release acknowledgment: no reply by design.
            state.sessions.remove(&id);
            return Ok(());
        }
        _ => {}
    }

    let Some(session) = state.sessions.get_mut(&id) else {
        return reply_err(stream, ErrorCode::IdNotFound);
    };

    match op {
        Opcode::Destroy => {
            reply_ok(stream)
        }
        Opcode::Start => {
            session.state = State::Queued.to_wire();
            reply_ok(stream)
        }
        Opcode::Pause => {
            session.state = State::Paused.to_wire();
            reply_ok(stream)
        }
        Opcode::Cancel => {
            session.state = State::Canceled.to_wire();
            reply_ok(stream)
        }
        Opcode::SetUrl => {
            session.url = Some(str_args.remove(0));
            reply_ok(stream)
        }
        Opcode::GetUrl => reply_opt_string(stream, session.url.clone()),
        Opcode::SetDestination => {
            session.destination = Some(str_args.remove(0));
            reply_ok(stream)
        }
        Opcode::GetDestination => reply_opt_string(stream, session.destination.clone()),
        Opcode::SetFileName => {
            session.file_name = Some(str_args.remove(0));
            reply_ok(stream)
        }
        Opcode::GetFileName => reply_opt_string(stream, session.file_name.clone()),
        Opcode::SetNetworkType => {
            session.network_type = int_arg.unwrap();
            reply_ok(stream)
        }
        Opcode::GetNetworkType => {
            reply_ok(stream)?;
            wire::write_int(stream, session.network_type)
        }
        Opcode::SetNetworkBonding => {
            session.network_bonding = int_arg.unwrap() != 0;
            reply_ok(stream)
        }
        Opcode::GetNetworkBonding => {
            let value = session.network_bonding as i32;
            reply_ok(stream)?;
            wire::write_int(stream, value)
        }
        Opcode::SetAutoDownload => {
            session.auto_download = int_arg.unwrap() != 0;
            reply_ok(stream)
        }
        Opcode::GetAutoDownload => {
            let value = session.auto_download as i32;
            reply_ok(stream)?;
            wire::write_int(stream, value)
        }
        Opcode::SetHttpHeader => {
            let value = str_args.remove(1);
            let field = str_args.remove(0);
            session.headers.insert(field, value);
            reply_ok(stream)
        }
        Opcode::GetHttpHeader => match session.headers.get(&str_args[0]).cloned() {
            Some(value) => reply_string(stream, &value),
            None => reply_err(stream, ErrorCode::FieldNotFound),
        },
        Opcode::DelHttpHeader => {
            if session.headers.remove(&str_args[0]).is_some() {
                reply_ok(stream)
            } else {
                reply_err(stream, ErrorCode::FieldNotFound)
            }
        }
        Opcode::SetStateCallback | Opcode::SetProgressCallback => reply_ok(stream),
        Opcode::GetState => {
            let value = session.state;
            reply_ok(stream)?;
            wire::write_int(stream, value)
        }
        Opcode::GetError => {
            reply_ok(stream)?;
            wire::write_int(stream, ErrorCode::None.to_wire())
        }
        Opcode::GetHttpStatus => {
            reply_ok(stream)?;
            wire::write_int(stream, 200)
        }
        Opcode::GetTempPath => reply_string(stream, "/tmp/fetchd/part.bin"),
        Opcode::GetContentName => reply_string(stream, "part.bin"),
        Opcode::GetTotalFileSize => {
            reply_ok(stream)?;
            stream.write_all(&4096u64.to_le_bytes())?;
            Ok(())
        }
        Opcode::GetMimeType => reply_string(stream, "application/octet-stream"),
        Opcode::Create | Opcode::Echo | Opcode::Free => unreachable!(),
    }
}

fn reply_ok(stream: &mut UnixStream) -> WireResult {
    wire::write_int(stream, ErrorCode::None.to_wire())?;
    stream.flush()?;
    Ok(())
}

fn reply_err(stream: &mut UnixStream, code: ErrorCode) -> WireResult {
    wire::write_int(stream, code.to_wire())?;
    stream.flush()?;
    Ok(())
}

fn reply_string(stream: &mut UnixStream, value: &str) -> WireResult {
    wire::write_int(stream, ErrorCode::None.to_wire())?;
    wire::write_string(stream, value)?;
    stream.flush()?;
    Ok(())
}

/// Getters for optional fields: unset values answer with NO_DATA.
fn reply_opt_string(stream: &mut UnixStream, value: Option<String>) -> WireResult {
    match value {
        Some(value) => reply_string(stream, &value),
        None => reply_err(stream, ErrorCode::NoData),
    }
}
