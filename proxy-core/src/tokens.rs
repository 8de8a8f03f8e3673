//! Reserved `mio::Token` values. Each readiness set is a distinct `Poll`
//! with its own token namespace, but using the same low values for the
//! fixed (non-connection) tokens across all three keeps the loops easy to
//! read side by side.

use mio::Token;

pub const SHUTDOWN: Token = Token(0);
pub const LISTENER: Token = Token(1);
pub const NEW_CONN: Token = Token(2);
pub const PROMOTE: Token = Token(3);

/// First token handed out to an accepted connection. Leaves room for the
/// fixed tokens above.
pub const FIRST_CONN: usize = 16;
