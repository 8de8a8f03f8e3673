//! Blocking reference client for the rendezvous proxy.
//!
//! Mirrors `Client.cpp`'s handshake/wait-for-ready flow, but with plain
//! blocking I/O and a reader thread instead of an epoll loop: std sockets
//! don't need non-blocking mode just to overlap a read and a write.

use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const READY_MSG: &[u8] = b"READY";
const WTF_MSG: &[u8] = b"WTF?";

#[derive(Debug)]
pub enum ConnectError {
    Io(io::Error),
    Rejected,
    Timeout,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Io(e) => write!(f, "connection error: {}", e),
            ConnectError::Rejected => write!(f, "server rejected the handshake"),
            ConnectError::Timeout => write!(f, "timed out waiting for a counterpart"),
        }
    }
}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        ConnectError::Io(e)
    }
}

/// Connects, sends the greeting, and blocks until `READY` (or a rejection).
pub fn connect(
    addr: &str,
    port: u16,
    secret: Option<&str>,
    timeout: Duration,
) -> Result<TcpStream, ConnectError> {
    let mut stream = TcpStream::connect((addr, port))?;
    stream.set_read_timeout(Some(timeout))?;

    match secret {
        Some(secret) => {
            stream.write_all(b"AUTH1")?;
            stream.write_all(secret.as_bytes())?;
            stream.write_all(b"\n")?;
        }
        None => stream.write_all(b"AUTH0")?,
    }

    let mut buf = [0u8; 5];
    match stream.read(&mut buf) {
        Ok(n) if &buf[..n] == READY_MSG => {}
        Ok(n) if &buf[..n] == WTF_MSG => return Err(ConnectError::Rejected),
        Ok(_) => return Err(ConnectError::Rejected),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
            return Err(ConnectError::Timeout)
        }
        Err(e) => return Err(e.into()),
    }

    stream.set_read_timeout(None)?;
    Ok(stream)
}

/// Spawns a reader thread that prints everything received until EOF, and
/// drives stdin lines to the socket on the calling thread until EOF or the
/// peer closes.
pub fn run_session(stream: TcpStream) -> io::Result<()> {
    let mut reader = stream.try_clone()?;
    let reader_handle = std::thread::spawn(move || {
        let mut buf = [0u8; 511];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    print!("{}", String::from_utf8_lossy(&buf[..n]));
                    let _ = io::stdout().flush();
                }
                Err(_) => break,
            }
        }
        println!("\n[disconnected]");
    });

    let mut writer = stream;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if writer.write_all(line.as_bytes()).is_err() || writer.write_all(b"\n").is_err() {
            break;
        }
    }

    let _ = writer.shutdown(std::net::Shutdown::Write);
    let _ = reader_handle.join();
    Ok(())
}
