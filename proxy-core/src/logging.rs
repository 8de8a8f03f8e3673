//! Builds the root logger passed explicitly into `Server`/`Client`.
//!
//! Follows `server/lib/flux/src/logging.rs`: `sloggers` builds a
//! `slog::Logger` from a small inline config. Unlike the teacher's stub
//! (which built a logger and then threw it away), the logger returned here
//! is the one actually threaded through the rest of the crate.

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds a terminal logger at the given severity, writing to stderr.
pub fn build_logger(level: Severity) -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);

    // A hand-rolled config is the only input here, so build() cannot fail
    // in practice; fall back to a discarding logger rather than panic.
    builder.build().unwrap_or_else(|_| slog::Logger::root(slog::Discard, slog::o!()))
}
