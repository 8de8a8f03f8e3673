//! Wires the three pipeline stages together and owns their threads
//! (spec §4 "Threading Model").

use crate::error::Result;
use crate::pairing::PairingTable;
use crate::tokens;
use crate::{acceptor, forwarder, rendezvous};
use mio::{Poll, Waker};
use slog::Logger;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A running rendezvous-forwarding proxy: one Acceptor, one Handshake/
/// Rendezvous and one Forwarder thread, plus the state shared between them.
pub struct Server {
    local_addr: SocketAddr,
    run_flag: Arc<AtomicBool>,
    shutdown_wakers: [Arc<Waker>; 3],
    handles: Vec<JoinHandle<Result<()>>>,
    pairing: Arc<PairingTable>,
    stopped: bool,
    log: Logger,
}

impl Server {
    /// Binds `port` (0 picks an ephemeral port) and starts all three stages.
    /// Fatal failures — binding the listener or constructing a `Poll` —
    /// are returned to the caller; nothing is spawned on error.
    pub fn start(port: u16, log: Logger) -> Result<Server> {
        let listener = acceptor::start_listening(port)?;
        let local_addr = listener.local_addr()?;

        let accept_poll = Poll::new()?;
        let pending_poll = Poll::new()?;
        let forward_poll = Poll::new()?;

        let accept_shutdown = Arc::new(Waker::new(accept_poll.registry(), tokens::SHUTDOWN)?);
        let pending_shutdown = Arc::new(Waker::new(pending_poll.registry(), tokens::SHUTDOWN)?);
        let forward_shutdown = Arc::new(Waker::new(forward_poll.registry(), tokens::SHUTDOWN)?);

        let new_conn_waker = Arc::new(Waker::new(pending_poll.registry(), tokens::NEW_CONN)?);
        let promote_waker = Arc::new(Waker::new(forward_poll.registry(), tokens::PROMOTE)?);

        let pending_registry = pending_poll.registry().try_clone()?;

        let pairing = Arc::new(PairingTable::new());
        let run_flag = Arc::new(AtomicBool::new(true));

        let (new_conn_tx, new_conn_rx) = mpsc::channel();
        let (promote_tx, promote_rx) = mpsc::channel();

        let mut handles = Vec::with_capacity(3);

        {
            let new_conn_waker = new_conn_waker.clone();
            let accept_shutdown = accept_shutdown.clone();
            let run_flag = run_flag.clone();
            let log = log.new(slog::o!("stage" => "acceptor"));
            handles.push(std::thread::spawn(move || {
                acceptor::run_accept_loop(
                    accept_poll,
                    listener,
                    pending_registry,
                    new_conn_tx,
                    new_conn_waker,
                    accept_shutdown,
                    run_flag,
                    log,
                )
            }));
        }

        {
            let promote_waker = promote_waker.clone();
            let pending_shutdown = pending_shutdown.clone();
            let new_conn_waker = new_conn_waker.clone();
            let pairing = pairing.clone();
            let run_flag = run_flag.clone();
            let log = log.new(slog::o!("stage" => "rendezvous"));
            handles.push(std::thread::spawn(move || {
                rendezvous::run_rendezvous_loop(
                    pending_poll,
                    new_conn_rx,
                    promote_tx,
                    promote_waker,
                    pending_shutdown,
                    new_conn_waker,
                    pairing,
                    run_flag,
                    log,
                )
            }));
        }

        {
            let forward_shutdown = forward_shutdown.clone();
            let promote_waker = promote_waker.clone();
            let pairing = pairing.clone();
            let run_flag = run_flag.clone();
            let log = log.new(slog::o!("stage" => "forwarder"));
            handles.push(std::thread::spawn(move || {
                forwarder::run_forward_loop(
                    forward_poll,
                    promote_rx,
                    pairing,
                    forward_shutdown,
                    promote_waker,
                    run_flag,
                    log,
                )
            }));
        }

        Ok(Server {
            local_addr,
            run_flag,
            shutdown_wakers: [accept_shutdown, pending_shutdown, forward_shutdown],
            handles,
            pairing,
            stopped: false,
            log,
        })
    }

    /// The bound address, including the actual port when `start` was given 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently-forwarding connections tracked by the pairing
    /// table (both handles of each pair counted).
    pub fn paired_count(&self) -> usize {
        self.pairing.len()
    }

    /// Signals all three stages to stop and joins their threads. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.run_flag.store(false, Ordering::Release);
        for waker in &self.shutdown_wakers {
            waker.wake().ok();
        }

        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => slog::warn!(self.log, "server: stage exited with error"; "error" => %e),
                Err(_) => slog::warn!(self.log, "server: stage thread panicked"),
            }
        }

        slog::info!(self.log, "server: stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
