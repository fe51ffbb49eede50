//! Error types for lipc operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Alias for `Result<T, lipc::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while setting up or running an exchange.
///
/// The public [`Client::send`](crate::Client::send) and
/// [`Server::listen`](crate::Server::listen) calls never return this type
/// directly; they render it into an error-flagged
/// [`Message`](crate::Message).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The socket path does not fit the platform address structure.
    #[error("socket path too long ({len} bytes, limit {max}): {}", .path.display())]
    PathTooLong {
        /// Offending path.
        path: PathBuf,
        /// Its length in bytes.
        len: usize,
        /// Longest accepted length in bytes.
        max: usize,
    },

    /// The socket's parent directory could not be created.
    #[error("failed to create socket directory {}: {source}", .path.display())]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// A socket lifecycle call failed (`socket`, `bind`, `listen`, ...).
    #[error("{op}() failed: {source}")]
    Socket {
        /// Name of the failing call.
        op: &'static str,
        /// Underlying error, including the OS error code.
        source: io::Error,
    },

    /// Sending or receiving one protocol step failed.
    #[error("{op} failed: {source}")]
    Io {
        /// Protocol step, e.g. `"header send"`.
        op: &'static str,
        /// Underlying error, including timeouts.
        source: io::Error,
    },

    /// The server answered the header with something other than [`ACK`](lipc_proto::ACK).
    #[error("ack failed: expected {:#04x}, got {got:?}", lipc_proto::ACK)]
    BadAck {
        /// First byte received, if any.
        got: Option<u8>,
    },

    /// A required payload was empty.
    #[error("{0} can not be empty")]
    Empty(&'static str),

    /// No client connected within the wait bound.
    #[error("no connection within {0:?}")]
    WaitTimeout(Duration),

    /// The peer closed the connection without sending a header and no stop
    /// was pending.
    #[error("header recv got no data (peer closed without sending)")]
    Hangup,

    /// The wake-up connection of
    /// [`Server::stop_listening`](crate::Server::stop_listening) was accepted.
    #[error("listening stopped")]
    Stopped,

    /// Construction failed earlier; carries the stored description.
    #[error("{0}")]
    Init(String),
}

impl Error {
    /// Returns `true` for failures caused by a stop request rather than a
    /// genuine fault. These are not reported to a server's handler.
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Hangup | Self::Stopped)
    }
}
