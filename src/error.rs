use std::io;

use thiserror::Error;

/// Convenience alias for fallible reactor and codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the pollset, the framing codec, and the socket
/// helpers.
///
/// Misuse of the API (an out-of-range signal number, a record length that
/// does not fit the header) is not represented here; those panic.
#[derive(Debug, Error)]
pub enum Error {
    /// An OS call failed. Tagged with the name of the failing operation.
    #[error("{0}: {1}")]
    Sys(&'static str, #[source] io::Error),

    /// Non-zero padding bytes encountered while reading a record payload.
    ///
    /// Receivers must reject such records; transports typically escalate
    /// this into connection termination.
    #[error("non-zero padding bytes encountered")]
    ShouldBeZero,

    /// A read cursor ran past the end of its message buffer.
    #[error("read past the end of the message buffer")]
    Overrun,

    /// Name resolution failed. Carries the resolution target and the
    /// resolver's message, a category distinct from socket errors.
    #[error("{0}: {1}")]
    Dns(String, String),

    /// An application callback failed with its own error.
    #[error(transparent)]
    User(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps the current `errno` as a system error tagged with `op`.
    pub(crate) fn last_os(op: &'static str) -> Error {
        Error::Sys(op, io::Error::last_os_error())
    }

    /// Wraps an arbitrary application error for propagation out of a
    /// callback.
    pub fn user<E>(err: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::User(Box::new(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Sys("io", err)
    }
}
