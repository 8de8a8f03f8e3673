//! Per-connection handshake state machine (spec §4.2).
//!
//! Each `PendingEntry` owns its socket outright while it sits in the
//! pending set, so none of this needs locking — only the Handshake thread
//! ever touches it.

use mio::net::TcpStream;
use std::io::{self, Read, Write};

pub const GREETING_LEN: usize = 5;
pub const SECRET_CAP: usize = 64;

pub const AUTH0: &[u8] = b"AUTH0";
pub const AUTH1: &[u8] = b"AUTH1";
pub const READY_MSG: &[u8] = b"READY";
pub const WTF_MSG: &[u8] = b"WTF?";
pub const DISCONNECTED_MSG: &[u8] = b"DISCONNECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Auth1,
    Ready,
    Dcn,
}

/// A connection currently in the handshake pipeline.
pub struct PendingEntry {
    pub stream: TcpStream,
    pub state: HandshakeState,
    pub secret: String,
    scratch: Vec<u8>,
}

enum ReadByte {
    Got(u8),
    WouldBlock,
    Eof,
}

impl PendingEntry {
    pub fn new(stream: TcpStream) -> Self {
        PendingEntry {
            stream,
            state: HandshakeState::Init,
            secret: String::new(),
            scratch: Vec::new(),
        }
    }

    /// Reads a single byte off the socket without blocking.
    fn read_byte(&mut self) -> ReadByte {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => ReadByte::Eof,
            Ok(_) => ReadByte::Got(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadByte::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadByte::WouldBlock,
            Err(_) => ReadByte::Eof,
        }
    }

    /// Drains the handshake greeting (`AUTH0`/`AUTH1`/malformed), byte by
    /// byte, accumulating across calls if the greeting arrives fragmented.
    /// Returns `Some(new_state)` once a full greeting has been classified
    /// (or the peer disconnected), `None` if more data is still needed.
    fn drive_init(&mut self) -> Option<HandshakeState> {
        loop {
            if self.scratch.len() == GREETING_LEN {
                let greeting = std::mem::take(&mut self.scratch);
                return Some(if greeting == AUTH0 {
                    self.secret.clear();
                    HandshakeState::Ready
                } else if greeting == AUTH1 {
                    HandshakeState::Auth1
                } else {
                    let _ = self.stream.write_all(WTF_MSG);
                    HandshakeState::Dcn
                });
            }

            match self.read_byte() {
                ReadByte::Got(b) => self.scratch.push(b),
                ReadByte::WouldBlock => return None,
                ReadByte::Eof => {
                    if self.scratch.is_empty() {
                        return Some(HandshakeState::Dcn);
                    }
                    // A partial greeting followed by close: still just EOF,
                    // never a malformed-greeting WTF? (spec boundary case).
                    return Some(HandshakeState::Dcn);
                }
            }
        }
    }

    /// Drains the secret following `AUTH1`, terminated by whitespace or a
    /// 64-byte cap. The terminator is consumed but discarded.
    fn drive_auth1(&mut self) -> Option<HandshakeState> {
        loop {
            match self.read_byte() {
                ReadByte::Got(b) => {
                    if b.is_ascii_whitespace() {
                        self.secret = String::from_utf8_lossy(&self.scratch).into_owned();
                        self.scratch.clear();
                        return Some(HandshakeState::Ready);
                    }

                    self.scratch.push(b);

                    if self.scratch.len() == SECRET_CAP {
                        self.secret = String::from_utf8_lossy(&self.scratch).into_owned();
                        self.scratch.clear();
                        return Some(HandshakeState::Ready);
                    }
                }
                ReadByte::WouldBlock => return None,
                ReadByte::Eof => return Some(HandshakeState::Dcn),
            }
        }
    }

    /// `Ready` connections shouldn't speak until after `READY` is sent;
    /// anything they do send is dropped, but EOF still tears them down.
    fn drive_ready(&mut self) -> Option<HandshakeState> {
        let mut buf = [0u8; 511];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Some(HandshakeState::Dcn),
                Ok(_) => continue, // drop and keep draining
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Some(HandshakeState::Dcn),
            }
        }
    }

    /// Drives the state machine for one readiness event, re-dispatching on
    /// every transition so that data already sitting in the kernel's
    /// receive buffer (e.g. a secret written in the same `write_all` as the
    /// `AUTH1` greeting) gets consumed in this same call. mio's readiness
    /// notifications are edge-triggered: a handler that classifies a
    /// greeting and returns without also draining whatever comes next can
    /// leave the connection stuck forever, since no further event will fire
    /// for data that already arrived. Returns once a handler reports
    /// `WouldBlock` (no more data yet) or the state machine reaches `Dcn`.
    pub fn process(&mut self) -> HandshakeState {
        loop {
            let next = match self.state {
                HandshakeState::Init => self.drive_init(),
                HandshakeState::Auth1 => self.drive_auth1(),
                HandshakeState::Ready => self.drive_ready(),
                HandshakeState::Dcn => None,
            };

            match next {
                Some(state) => {
                    self.state = state;
                    if state == HandshakeState::Dcn {
                        return self.state;
                    }
                }
                None => return self.state,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener as StdListener, TcpStream as StdStream};

    fn connected_pair() -> (TcpStream, StdStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn unsecured_greeting_reaches_ready() {
        let (server, mut client) = connected_pair();
        let mut entry = PendingEntry::new(server);

        client.write_all(AUTH0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(entry.process(), HandshakeState::Ready);
        assert_eq!(entry.secret, "");
    }

    #[test]
    fn secured_greeting_captures_secret() {
        let (server, mut client) = connected_pair();
        let mut entry = PendingEntry::new(server);

        client.write_all(AUTH1).unwrap();
        client.write_all(b"topsecret\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(entry.process(), HandshakeState::Ready);
        assert_eq!(entry.secret, "topsecret");
    }

    #[test]
    fn greeting_and_secret_in_a_single_write_reach_ready_in_one_process_call() {
        let (server, mut client) = connected_pair();
        let mut entry = PendingEntry::new(server);

        // One `write_all` puts the whole greeting and secret in the kernel
        // buffer at once; since readiness is edge-triggered, a single
        // `process()` call must drain all of it rather than stopping once
        // it classifies the `AUTH1` prefix.
        client.write_all(b"AUTH1topsecret\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(entry.process(), HandshakeState::Ready);
        assert_eq!(entry.secret, "topsecret");
    }

    #[test]
    fn secret_capped_at_64_bytes_without_terminator() {
        let (server, mut client) = connected_pair();
        let mut entry = PendingEntry::new(server);

        client.write_all(AUTH1).unwrap();
        client.write_all(&[b'x'; SECRET_CAP]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(entry.process(), HandshakeState::Ready);
        assert_eq!(entry.secret.len(), SECRET_CAP);
    }

    #[test]
    fn malformed_greeting_sends_wtf_and_disconnects() {
        let (server, mut client) = connected_pair();
        let mut entry = PendingEntry::new(server);

        client.write_all(b"HELLO").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(entry.process(), HandshakeState::Dcn);

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], WTF_MSG);
    }

    #[test]
    fn short_greeting_then_close_is_dcn_without_wtf() {
        let (server, mut client) = connected_pair();
        let mut entry = PendingEntry::new(server);

        client.write_all(b"HE").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(entry.process(), HandshakeState::Dcn);
    }
}
