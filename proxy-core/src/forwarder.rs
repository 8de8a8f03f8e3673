//! Component C: the Forwarder (spec §4.3).

use crate::error::Result;
use crate::handshake::{DISCONNECTED_MSG, READY_MSG};
use crate::pairing::PairingTable;
use crate::tokens;
use hashbrown::HashMap;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use slog::Logger;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// One newly-rendezvoused pair, handed from the Handshake thread to the
/// Forwarder thread. Carries both sockets by value since `mio::net::
/// TcpStream` has a single owner and cannot simply be shared.
pub struct Promote {
    pub a: (Token, TcpStream),
    pub b: (Token, TcpStream),
}

const READ_QUANTUM: usize = 511;

/// Drives the forwarding loop until `run_flag` is cleared.
pub fn run_forward_loop(
    mut poll: Poll,
    promote_rx: Receiver<Promote>,
    pairing: Arc<PairingTable>,
    // Both kept alive for the loop's duration: dropping a `Waker`
    // deregisters it.
    _shutdown_waker: Arc<Waker>,
    _promote_waker: Arc<Waker>,
    run_flag: Arc<AtomicBool>,
    log: Logger,
) -> Result<()> {
    // Used to register newly-promoted streams from inside this same loop.
    let registry = poll.registry().try_clone()?;

    let mut paired: HashMap<Token, TcpStream> = HashMap::new();
    let mut events = Events::with_capacity(1024);
    let mut buf = [0u8; READ_QUANTUM];

    slog::info!(log, "forwarder: ready");

    while run_flag.load(Ordering::Acquire) {
        drain_promotions(&promote_rx, &registry, &mut paired, &log);

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }

        if !run_flag.load(Ordering::Acquire) {
            break;
        }

        for event in events.iter() {
            if event.token() == tokens::SHUTDOWN || event.token() == tokens::PROMOTE {
                continue;
            }

            let token = event.token();

            // Edge-triggered: keep reading until the socket would block.
            // Stopping after a single `read()` strands any remaining bytes
            // of a payload larger than one chunk, since no further event
            // fires for data that already arrived.
            loop {
                let counterpart = match pairing.counterpart(token) {
                    Some(c) => c,
                    // Already torn down by the other side this cycle.
                    None => break,
                };

                let n = {
                    let stream = match paired.get_mut(&token) {
                        Some(s) => s,
                        None => break,
                    };
                    match stream.read(&mut buf) {
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            slog::warn!(log, "forwarder: read error"; "token" => token.0, "error" => %e);
                            break;
                        }
                    }
                };

                if n > 0 {
                    if let Some(dest) = paired.get_mut(&counterpart) {
                        if let Err(e) = dest.write_all(&buf[..n]) {
                            slog::warn!(log, "forwarder: write error"; "from" => token.0, "to" => counterpart.0, "error" => %e);
                        } else {
                            slog::debug!(log, "forward";
                                "from" => token.0, "to" => counterpart.0,
                                "payload" => String::from_utf8_lossy(&buf[..n]).into_owned());
                        }
                    }
                    // Keep draining: there may be more already buffered.
                    continue;
                }

                slog::info!(log, "forwarder: peer disconnected"; "token" => token.0);

                if let Some(dest) = paired.get_mut(&counterpart) {
                    let _ = dest.write_all(DISCONNECTED_MSG);
                }

                pairing.remove_pair(token);

                if let Some(mut s) = paired.remove(&token) {
                    let _ = poll.registry().deregister(&mut s);
                }
                if let Some(mut s) = paired.remove(&counterpart) {
                    let _ = poll.registry().deregister(&mut s);
                }
                break;
            }
        }
    }

    slog::info!(log, "forwarder: exiting");
    Ok(())
}

fn drain_promotions(
    promote_rx: &Receiver<Promote>,
    registry: &mio::Registry,
    paired: &mut HashMap<Token, TcpStream>,
    log: &Logger,
) {
    while let Ok(mut promote) = promote_rx.try_recv() {
        for (token, stream) in [&mut promote.a, &mut promote.b] {
            if let Err(e) = registry.register(stream, *token, Interest::READABLE) {
                slog::warn!(log, "forwarder: failed to register promoted stream"; "token" => token.0, "error" => %e);
                continue;
            }

            // Only tell a side it's paired once the routing table and this
            // registration are both in place, so nothing it sends the
            // instant it reads `READY` can arrive before the Forwarder is
            // ready to route it.
            if let Err(e) = stream.write_all(READY_MSG) {
                slog::warn!(log, "forwarder: failed to send READY"; "token" => token.0, "error" => %e);
            }
        }

        slog::info!(log, "forwarder: pair promoted"; "a" => promote.a.0.0, "b" => promote.b.0.0);

        paired.insert(promote.a.0, promote.a.1);
        paired.insert(promote.b.0, promote.b.1);
    }
}
