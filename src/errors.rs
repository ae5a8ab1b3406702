//! Constructors for the errors this crate raises on its own behalf.

use std::io;

/// The io-context has been handed to `end_watching` and can no longer be
/// used for submissions.
pub(crate) fn retired() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "io context is retired")
}

/// An operation is already outstanding in the requested direction.
pub(crate) fn busy() -> io::Error {
    io::Error::new(
        io::ErrorKind::WouldBlock,
        "an operation is already pending in this direction",
    )
}

/// The socket is already associated with the completion channel.
pub(crate) fn already_associated() -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        "socket is already associated with the completion channel",
    )
}

/// The background worker went away before reporting its startup.
#[cfg(feature = "background")]
pub(crate) fn worker_gone() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "worker thread exited during startup")
}

/// The background worker panicked.
#[cfg(feature = "background")]
pub(crate) fn worker_panicked() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "worker thread panicked")
}
