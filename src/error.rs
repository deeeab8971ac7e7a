//! The small set of error kinds allowed to cross a module boundary.
//!
//! Per the stack's error-handling design, everything that can be recovered locally (malformed
//! frames, checksum mismatches, unsupported protocols, unbound ports) is dropped and logged, never
//! turned into one of these. `StackError` only covers TAP I/O, CLI/config validation, and the
//! socket facade's bind/send outcomes that a caller genuinely needs to react to.

use thiserror::Error;

/// Errors that can escape the stack to its caller.
#[derive(Debug, Error)]
pub enum StackError {
    /// Reading from or writing to the TAP device failed; fatal to the event loop.
    #[error("tap device I/O error: {0}")]
    TapIo(#[from] std::io::Error),

    /// A CLI argument or constructed configuration was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A UDP/TCP bind request named a port that is already bound.
    #[error("port {0} already in use")]
    PortInUse(u16),

    /// A send request named a socket id that was never bound.
    #[error("unknown socket id {0}")]
    UnknownSocket(u64),
}
