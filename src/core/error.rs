use std::io;

use thiserror::Error;

/// Errors raised by the server internals.
///
/// Protocol and resource failures never show up here: those are answered
/// with an HTTP status. These are the failures that either abort startup or
/// force a connection closed without a response.
#[derive(Debug, Error)]
pub enum Error {
    #[error("write buffer full: {needed} bytes needed, {remaining} remaining")]
    WriteBufferFull { needed: usize, remaining: usize },

    #[error("thread pool needs at least one worker")]
    NoWorkers,

    #[error("queue depth must be greater than zero")]
    ZeroQueueDepth,

    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
