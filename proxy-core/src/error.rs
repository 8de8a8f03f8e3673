use std::io;
use std::net;

/// Errors surfaced across a rendezvous-proxy component boundary.
///
/// Mirrors the teacher's `net::error`/`net::result` modules: a plain enum,
/// a `From<io::Error>` conversion, and a crate-local `Result` alias, rather
/// than reaching for `thiserror`/`anyhow`.
#[derive(Debug)]
pub enum Error {
    /// Failed to resolve/bind/listen on the configured port. Fatal to startup.
    Bind(io::Error),
    /// A readiness-set registration failed for an otherwise-live socket.
    Register(io::ErrorKind),
    /// Any other I/O failure.
    Io(io::ErrorKind),
    /// The configured address could not be parsed.
    AddrParse,
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        Error::Io(io_error.kind())
    }
}

impl From<net::AddrParseError> for Error {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        Error::AddrParse
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Bind(e) => write!(f, "failed to bind listening socket: {}", e),
            Error::Register(kind) => write!(f, "failed to register with readiness set: {:?}", kind),
            Error::Io(kind) => write!(f, "io error: {:?}", kind),
            Error::AddrParse => write!(f, "failed to parse address"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
