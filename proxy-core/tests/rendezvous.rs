//! End-to-end tests driving `Server` over real loopback sockets.

use proxy_core::handshake::{DISCONNECTED_MSG, READY_MSG, WTF_MSG};
use proxy_core::Server;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

fn start_server() -> Server {
    Server::start(0, test_logger()).expect("server starts")
}

fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

fn expect_exact(stream: &mut TcpStream, want: &[u8]) {
    let mut buf = vec![0u8; want.len()];
    stream.read_exact(&mut buf).expect("read expected bytes");
    assert_eq!(buf, want);
}

#[test]
fn unsecured_pair_forwards_both_directions() {
    let server = start_server();

    let mut a = connect(&server);
    let mut b = connect(&server);

    a.write_all(b"AUTH0").unwrap();
    b.write_all(b"AUTH0").unwrap();

    expect_exact(&mut a, READY_MSG);
    expect_exact(&mut b, READY_MSG);

    a.write_all(b"hello from a").unwrap();
    let mut buf = [0u8; 12];
    b.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello from a");

    b.write_all(b"hello from b").unwrap();
    a.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello from b");
}

#[test]
fn secured_pair_requires_matching_secret() {
    let server = start_server();

    let mut a = connect(&server);
    let mut b = connect(&server);

    a.write_all(b"AUTH1topsecret\n").unwrap();
    b.write_all(b"AUTH1topsecret\n").unwrap();

    expect_exact(&mut a, READY_MSG);
    expect_exact(&mut b, READY_MSG);

    a.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    b.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");
}

#[test]
fn mismatched_secrets_never_pair_with_each_other() {
    let server = start_server();

    let mut a = connect(&server);
    let mut b = connect(&server);

    a.write_all(b"AUTH1one\n").unwrap();
    b.write_all(b"AUTH1two\n").unwrap();

    // Neither should see READY yet: each is alone on its own secret.
    a.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut buf = [0u8; 5];
    assert!(a.read(&mut buf).is_err() || a.read(&mut buf).unwrap_or(0) == 0);

    // A third client completes `a`'s pair.
    let mut c = connect(&server);
    c.write_all(b"AUTH1one\n").unwrap();

    a.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    expect_exact(&mut a, READY_MSG);
    expect_exact(&mut c, READY_MSG);
}

#[test]
fn malformed_greeting_gets_wtf_and_is_dropped() {
    let server = start_server();
    let mut a = connect(&server);

    a.write_all(b"NOPE!").unwrap();
    expect_exact(&mut a, WTF_MSG);

    let mut buf = [0u8; 1];
    let n = a.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "connection should be closed after WTF?");
}

#[test]
fn counterpart_disconnect_notifies_survivor() {
    let server = start_server();

    let mut a = connect(&server);
    let b = connect(&server);
    let mut b = b;

    a.write_all(b"AUTH0").unwrap();
    b.write_all(b"AUTH0").unwrap();

    expect_exact(&mut a, READY_MSG);
    expect_exact(&mut b, READY_MSG);

    drop(b);

    expect_exact(&mut a, DISCONNECTED_MSG);
}

#[test]
fn stop_joins_cleanly_with_a_live_pair() {
    let mut server = start_server();

    let mut a = connect(&server);
    let mut b = connect(&server);

    a.write_all(b"AUTH0").unwrap();
    b.write_all(b"AUTH0").unwrap();

    expect_exact(&mut a, READY_MSG);
    expect_exact(&mut b, READY_MSG);

    assert_eq!(server.paired_count(), 2);

    server.stop();
    // Idempotent: calling again (and dropping) must not panic or hang.
    server.stop();
}
