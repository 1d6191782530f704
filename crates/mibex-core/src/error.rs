//! Error taxonomy shared across the engine
//!
//! Propagation policy:
//! - parse-level and per-event errors are recovered locally (logged, the
//!   session continues);
//! - per-command errors go to the exact caller that issued the command;
//! - session-fatal errors (`BackendTerminated`) are broadcast to every
//!   outstanding caller and the session is torn down.
//!
//! Nothing is retried inside the engine: the MI protocol has no general
//! idempotent-replay guarantee, so retry policy belongs to callers.

use crate::breakpoint::BreakpointIdentity;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed MI line. Recovered by the reader loop; surfaces here only
    /// when a caller parses text directly.
    #[error("protocol parse error: {0}")]
    Parse(#[from] mibex_mi::ParseError),

    /// A `^error` result record; the session continues
    #[error("backend error: {0}")]
    Backend(String),

    /// No result record within the configured deadline; never retransmitted
    #[error("command timed out after {0}ms")]
    Timeout(u64),

    /// Caller withdrew interest; no backend effect guaranteed
    #[error("command cancelled")]
    Cancelled,

    /// Subprocess exited or closed its output stream; fatal to the session
    #[error("backend terminated")]
    BackendTerminated,

    /// Feature not offered by this backend variant, detected before any
    /// command was sent
    #[error("capability not supported by this backend: {0}")]
    CapabilityUnsupported(&'static str),

    /// Duplicate insert for an existing breakpoint identity
    #[error("breakpoint already set: {0}")]
    AlreadySet(BreakpointIdentity),

    /// Remove/update against an unknown breakpoint identity
    #[error("breakpoint not found: {0}")]
    NotFound(BreakpointIdentity),

    /// Breakpoint entered terminal Failed state
    #[error("breakpoint install failed: {0}")]
    InstallFailed(String),

    /// Pipe/process I/O fault
    #[error("I/O error: {0}")]
    Io(String),

    /// An internal channel closed unexpectedly (dispatcher torn down)
    #[error("internal channel closed")]
    ChannelClosed,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
