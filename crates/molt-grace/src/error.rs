//! Error types for listener acquisition, restart and signal setup.

use std::os::unix::io::RawFd;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the supervisor.
///
/// `Bind`, `Inherit` and `Signal` are fatal at startup. `Spawn` only abandons
/// the restart attempt; the parent keeps serving. A drain that runs out of
/// time is not an error, see [`DrainOutcome`](crate::DrainOutcome).
#[derive(Debug, Error)]
pub enum GraceError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to inherit listener at fd {fd}: {reason}")]
    Inherit { fd: RawFd, reason: String },

    #[error("failed to spawn {}: {source}", .exe.display())]
    Spawn {
        exe: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to register {signal} handler: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GraceError>;
