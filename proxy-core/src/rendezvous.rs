//! Component B: Handshake & Rendezvous (spec §4.2). The heart of the system.

use crate::error::Result;
use crate::forwarder::Promote;
use crate::handshake::{HandshakeState, PendingEntry};
use crate::pairing::PairingTable;
use crate::tokens;
use hashbrown::HashMap;
use mio::net::TcpStream;
use mio::{Events, Poll, Token, Waker};
use slog::Logger;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

/// All rendezvous-stage bookkeeping lives here, owned exclusively by this
/// thread. No lock is needed for any of it (spec §4.2 "Threading").
struct RendezvousState {
    pending: HashMap<Token, PendingEntry>,
    token_secret: HashMap<Token, String>,
    /// secret -> single waiting token. At most one waiter per secret
    /// between pairing events (spec's "Rendezvous Slot").
    waiting: HashMap<String, Token>,
}

impl RendezvousState {
    fn new() -> Self {
        RendezvousState {
            pending: HashMap::new(),
            token_secret: HashMap::new(),
            waiting: HashMap::new(),
        }
    }

    fn remove_waiter_if_any(&mut self, token: Token) {
        if let Some(secret) = self.token_secret.remove(&token) {
            let still_waiting = matches!(self.waiting.get(&secret), Some(&waiter) if waiter == token);
            if still_waiting {
                self.waiting.remove(&secret);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run_rendezvous_loop(
    mut poll: Poll,
    new_conn_rx: Receiver<(Token, TcpStream)>,
    promote_tx: Sender<Promote>,
    promote_waker: Arc<Waker>,
    // Kept alive for the loop's duration: dropping a `Waker` deregisters it.
    _shutdown_waker: Arc<Waker>,
    _new_conn_waker: Arc<Waker>,
    pairing: Arc<PairingTable>,
    run_flag: Arc<AtomicBool>,
    log: Logger,
) -> Result<()> {
    let registry = poll.registry().try_clone()?;
    let mut state = RendezvousState::new();
    let mut events = Events::with_capacity(1024);

    slog::info!(log, "rendezvous: ready");

    while run_flag.load(Ordering::Acquire) {
        drain_new_connections(&new_conn_rx, &mut state);

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e.into());
        }

        if !run_flag.load(Ordering::Acquire) {
            break;
        }

        let ready_tokens: Vec<Token> = events
            .iter()
            .map(|e| e.token())
            .filter(|t| *t != tokens::SHUTDOWN && *t != tokens::NEW_CONN)
            .collect();

        for token in ready_tokens {
            let prev_state = match state.pending.get(&token) {
                Some(entry) => entry.state,
                None => continue,
            };

            let new_state = state.pending.get_mut(&token).unwrap().process();

            match new_state {
                HandshakeState::Ready if prev_state != HandshakeState::Ready => {
                    on_ready(
                        token,
                        &mut state,
                        &registry,
                        &promote_tx,
                        &promote_waker,
                        &pairing,
                        &log,
                    );
                }
                HandshakeState::Dcn => {
                    on_disconnect(token, &mut state, &registry, &log);
                }
                _ => {}
            }
        }
    }

    slog::info!(log, "rendezvous: exiting");
    Ok(())
}

fn drain_new_connections(new_conn_rx: &Receiver<(Token, TcpStream)>, state: &mut RendezvousState) {
    while let Ok((token, stream)) = new_conn_rx.try_recv() {
        state.pending.insert(token, PendingEntry::new(stream));
    }
}

/// A connection just finished its greeting. Either it completes a pair
/// waiting on the same secret (spec's rendezvous match) or it becomes the
/// new waiter for that secret.
#[allow(clippy::too_many_arguments)]
fn on_ready(
    token: Token,
    state: &mut RendezvousState,
    registry: &mio::Registry,
    promote_tx: &Sender<Promote>,
    promote_waker: &Waker,
    pairing: &PairingTable,
    log: &Logger,
) {
    let secret = state.pending.get(&token).unwrap().secret.clone();

    let partner = match state.waiting.get(&secret) {
        Some(&p) => p,
        None => {
            state.waiting.insert(secret.clone(), token);
            state.token_secret.insert(token, secret);
            return;
        }
    };

    state.waiting.remove(&secret);
    state.token_secret.remove(&partner);

    let mut self_entry = state.pending.remove(&token).unwrap();
    let mut partner_entry = state.pending.remove(&partner).unwrap();

    let _ = registry.deregister(&mut self_entry.stream);
    let _ = registry.deregister(&mut partner_entry.stream);

    // Routing entry and handoff happen first; `READY` itself is only sent
    // once the Forwarder has the sockets and the pairing table already
    // reflects the pair, so neither side can race ahead of either (the
    // Forwarder thread writes `READY` once it registers each stream — see
    // `forwarder::drain_promotions`).
    pairing.insert_pair(token, partner);

    let promote = Promote {
        a: (token, self_entry.stream),
        b: (partner, partner_entry.stream),
    };

    if promote_tx.send(promote).is_ok() {
        promote_waker.wake().ok();
    }

    slog::info!(log, "rendezvous: pair formed"; "a" => token.0, "b" => partner.0, "secret" => %secret);
}

fn on_disconnect(token: Token, state: &mut RendezvousState, registry: &mio::Registry, log: &Logger) {
    if let Some(mut entry) = state.pending.remove(&token) {
        let _ = registry.deregister(&mut entry.stream);
    }
    state.remove_waiter_if_any(token);
    slog::info!(log, "rendezvous: client disconnected"; "token" => token.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_waiter_if_any_clears_only_current_waiter() {
        let mut state = RendezvousState::new();
        state.waiting.insert("s".into(), Token(5));
        state.token_secret.insert(Token(5), "s".into());

        state.remove_waiter_if_any(Token(5));

        assert!(state.waiting.get("s").is_none());
        assert!(state.token_secret.get(&Token(5)).is_none());
    }

    #[test]
    fn remove_waiter_if_any_is_noop_for_unknown_token() {
        let mut state = RendezvousState::new();
        state.waiting.insert("s".into(), Token(5));
        state.token_secret.insert(Token(5), "s".into());

        state.remove_waiter_if_any(Token(9));

        assert_eq!(state.waiting.get("s"), Some(&Token(5)));
    }
}
