//! Component A: the Acceptor (spec §4.1).

use crate::error::{Error, Result};
use crate::tokens;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Waker};
use slog::Logger;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Minimum accept backlog the spec requires (§6).
const MIN_BACKLOG: i32 = 1024;

/// Resolves a bindable IPv4 address, creates a non-blocking `SOCK_STREAM`
/// socket with `SO_REUSEADDR`, binds it, and starts listening with a
/// backlog of at least 100. Fatal to start-up on any failure.
pub fn start_listening(port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(Error::Bind)?;
    socket.set_reuse_address(true).map_err(Error::Bind)?;
    socket.set_nonblocking(true).map_err(Error::Bind)?;
    socket.bind(&addr.into()).map_err(Error::Bind)?;
    socket.listen(MIN_BACKLOG).map_err(Error::Bind)?;

    Ok(TcpListener::from_std(socket.into()))
}

/// Drives the accept loop until `run_flag` is cleared. Accepted streams are
/// registered directly into the pending set's registry (this crate's
/// analogue of the original's `modifyEPOLL(_epoll_pending_fd, ...)` call
/// from the connection thread) and then handed to the Handshake thread by
/// value over `new_conn_tx`, since a `mio::net::TcpStream` cannot otherwise
/// cross threads.
pub fn run_accept_loop(
    mut poll: Poll,
    listener: TcpListener,
    pending_registry: Registry,
    new_conn_tx: Sender<(mio::Token, TcpStream)>,
    new_conn_waker: Arc<Waker>,
    // Kept alive for the loop's duration: dropping a `Waker` deregisters it.
    _shutdown_waker: Arc<Waker>,
    run_flag: Arc<AtomicBool>,
    log: Logger,
) -> Result<()> {
    let mut listener = listener;
    poll.registry()
        .register(&mut listener, tokens::LISTENER, Interest::READABLE)?;

    let mut events = Events::with_capacity(1024);
    let mut next_token = tokens::FIRST_CONN;

    slog::info!(log, "acceptor: waiting for connections");

    while run_flag.load(Ordering::Acquire) {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }

        if !run_flag.load(Ordering::Acquire) {
            break;
        }

        for event in events.iter() {
            if event.token() == tokens::SHUTDOWN {
                continue;
            }

            // Edge-triggered: drain `accept()` until it would block.
            loop {
                match listener.accept() {
                    Ok((mut stream, addr)) => {
                        let token = mio::Token(next_token);
                        next_token += 1;

                        if let Err(e) =
                            pending_registry.register(&mut stream, token, Interest::READABLE)
                        {
                            slog::warn!(log, "acceptor: failed to register new connection"; "error" => %e);
                            drop(stream);
                            continue;
                        }

                        slog::info!(log, "acceptor: new client"; "addr" => %addr, "token" => token.0);

                        if new_conn_tx.send((token, stream)).is_ok() {
                            new_conn_waker.wake().ok();
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        slog::warn!(log, "acceptor: transient accept error"; "error" => %e);
                        break;
                    }
                }
            }
        }
    }

    slog::info!(log, "acceptor: exiting");
    Ok(())
}
