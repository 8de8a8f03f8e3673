//! Core of the rendezvous forwarding proxy: an Acceptor, a Handshake &
//! Rendezvous stage, and a Forwarder, each on its own thread, connected by
//! channels and a shared pairing table.

pub mod acceptor;
pub mod error;
pub mod forwarder;
pub mod handshake;
pub mod logging;
pub mod pairing;
pub mod rendezvous;
pub mod server;
pub mod tokens;

pub use error::{Error, Result};
pub use server::Server;
