// SPDX-License-Identifier: MIT

#![allow(clippy::unwrap_used)]

use std::os::unix::net::UnixListener;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc;

use super::*;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config::new(dir.path().join("fetchd.sock"))
        .with_timeout(std::time::Duration::from_millis(500))
}

#[test]
fn open_fails_when_nothing_listens() {
    let dir = tempfile::tempdir().unwrap();
    let err = Connection::open(&test_config(&dir)).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn open_declares_roles_and_pid() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let listener = UnixListener::bind(&config.socket_path).unwrap();

    let (tx, rx) = mpsc::channel();
    let server = std::thread::spawn(move || {
        // One handshake per channel, in connect order.
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().unwrap();
            let role = wire::read_int(&mut stream).unwrap();
            let pid = wire::read_int(&mut stream).unwrap();
            tx.send((role, pid)).unwrap();
        }
    });

    let conn = Connection::open(&config).unwrap();

    let (role, pid) = rx.recv().unwrap();
    assert_eq!(ChannelRole::from_wire(role), Some(ChannelRole::Command));
    assert_eq!(pid, std::process::id() as i32);

    let (role, pid) = rx.recv().unwrap();
    assert_eq!(ChannelRole::from_wire(role), Some(ChannelRole::Event));
    assert_eq!(pid, std::process::id() as i32);

    server.join().unwrap();
    conn.request_stop();
}

#[test]
fn activator_runs_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("fetchd.sock");

    // The activator stands in for the platform's service launcher: here it
    // binds the socket itself, so a successful open proves it ran first.
    let activator_path = socket_path.clone();
    let config = Config::new(&socket_path)
        .with_timeout(std::time::Duration::from_millis(500))
        .with_activator(move || {
            let listener = UnixListener::bind(&activator_path)?;
            std::thread::spawn(move || {
                while let Ok((stream, _)) = listener.accept() {
                    // Keep accepted channels open until the test ends.
                    std::mem::forget(stream);
                }
            });
            Ok(())
        });

    let conn = Connection::open(&config).unwrap();
    conn.request_stop();
}

#[test]
fn activator_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let config = test_config(&dir).with_activator(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        Err(std::io::Error::other("launcher unavailable"))
    });

    // Connecting still fails because nothing listens, but only with the
    // socket error, and the hook was invoked exactly once.
    let err = Connection::open(&config).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_is_sticky_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let listener = UnixListener::bind(&config.socket_path).unwrap();
    let server = std::thread::spawn(move || {
        for _ in 0..2 {
            let (stream, _) = listener.accept().unwrap();
            std::mem::forget(stream);
        }
    });

    let conn = Connection::open(&config).unwrap();
    server.join().unwrap();

    assert!(!conn.is_stopping());
    conn.request_stop();
    assert!(conn.is_stopping());
    conn.request_stop();
    assert!(conn.is_stopping());
}
