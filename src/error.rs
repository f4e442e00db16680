//! The error taxonomy shared by every module in this crate.

use std::io;

/// Errors produced by the socket, session, server and multiplexer layers.
///
/// Variants map directly onto the error taxonomy of the session framework:
/// most are plain `std::io::Error` wrappers, the rest are API-misuse or
/// configuration errors that have no POSIX errno behind them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A system call failed. `syscall` names the call for logging purposes.
    #[error("{syscall}: {source}")]
    Io {
        /// Name of the failing syscall (e.g. `"bind"`, `"accept"`).
        syscall: &'static str,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The API was used in a way that violates a precondition: wrong
    /// direction, double `set_family`, etc.
    #[error("invalid state: {0}")]
    BadState(&'static str),

    /// `readline` or `select` timed out while the peer was still connected.
    ///
    /// This is also surfaced as `Session::state() == SessionState::Timeout`;
    /// it is kept as an `Error` variant for APIs that return `Result`
    /// directly (e.g. `Socket::select`).
    #[error("operation timed out")]
    Timeout,

    /// A connected peer closed the connection in the middle of a line, with
    /// no further data available.
    #[error("connection truncated mid-line")]
    Truncated,

    /// `ControllerRegistry::invoke` was called with a handle that was never
    /// returned by `register`.
    #[error("unknown controller handle {0:?}")]
    BadHandle(crate::controller::Handle),

    /// A required hook (`request` or `response`) was missing.
    #[error("required hook missing: {0}")]
    BadHook(&'static str),

    /// `ControllerRegistry::register` was called after `CONTROLLER_MAX`
    /// controllers were already registered.
    #[error("controller registry is full")]
    RegistryFull,

    /// Pre-flight could not resolve the configured user name.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// Pre-flight could not resolve the configured group name.
    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    /// An invariant was violated; this should never happen in correct code.
    #[error("fatal: {0}")]
    Fatal(&'static str),

    /// A single poll iteration reported more ready descriptors than the
    /// multiplexer processed.
    #[error("poll reported {reported} ready descriptors, only {handled} were handled")]
    UnhandledConnections {
        /// What `poll(2)`/`epoll_wait` reported as ready.
        reported: usize,
        /// How many the multiplexer actually dispatched.
        handled: usize,
    },
}

impl Error {
    /// Wrap an I/O error with the name of the syscall that produced it.
    pub(crate) fn io(syscall: &'static str, source: io::Error) -> Self {
        Error::Io { syscall, source }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
