//! Platform socket primitives.
//!
//! Protocol code only talks to [`LocalListener`] and [`LocalStream`]. One
//! implementation per platform is selected at build time:
//! - **Unix**: `AF_UNIX` via `libc` and `std::os::unix::net`.
//! - **Windows**: Winsock `AF_UNIX` via `windows-sys`.
//!
//! Closing is `Drop`. Every socket that carries an exchange is configured
//! with send and receive timeouts before use.

use std::io;
use std::path::Path;
use std::time::Duration;

use lipc_proto::Channel;

use crate::error::Result;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{Listener, Stream, sun_path_capacity};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{Listener, Stream, sun_path_capacity};

/// A bound, listening local socket.
pub(crate) trait LocalListener: Sized {
    /// Connection type produced by [`accept`](Self::accept).
    type Stream: LocalStream;

    /// Creates a stream socket, applies `timeout`, binds it to `path` and
    /// starts listening.
    fn bind(path: &Path, timeout: Duration) -> Result<Self>;

    /// Waits up to `timeout` for a pending connection. Returns `false` if
    /// none arrived.
    fn wait(&self, timeout: Duration) -> io::Result<bool>;

    /// Accepts one pending connection.
    fn accept(&self) -> io::Result<Self::Stream>;
}

/// A connected local stream socket.
pub(crate) trait LocalStream: Channel + Sized {
    /// Creates a socket, applies `timeout` and connects it to `path`.
    fn connect(path: &Path, timeout: Duration) -> Result<Self>;

    /// Sets both the send and the receive timeout.
    fn set_timeout(&self, timeout: Duration) -> io::Result<()>;
}
