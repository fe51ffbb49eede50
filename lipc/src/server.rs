//! Server role: one accepted connection per [`Server::listen`] call.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use lipc_proto::{ACK, Channel, Message};
use tracing::{debug, info, warn};

use crate::addr;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sys::{self, LocalListener, LocalStream};

/// Accepts connections on a local socket and answers them with a handler.
///
/// Construction never fails; a server whose socket could not be set up is
/// *invalid* and reports the stored error from every [`listen`](Self::listen).
/// The socket file is removed when the server is dropped.
///
/// `listen` handles one connection per call and is meant to run in a loop
/// on a dedicated thread; [`stop_listening`](Self::stop_listening) from
/// another thread unblocks it.
///
/// ```no_run
/// use lipc::{Message, Server};
///
/// let server = Server::new("/tmp/lipc/server.sock");
/// loop {
///     let done = server.listen(|header, message| {
///         if message.is_error() {
///             return Message::empty();
///         }
///         Message::from(format!("{} bytes under {}", message.size(), header.as_str()))
///     });
///     if done.is_error() {
///         eprintln!("{}", done.as_str());
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Server {
    /// Listening socket, or the reason construction failed.
    listener: Result<sys::Listener>,
    /// Socket path, removed on drop.
    path: PathBuf,
    /// Timeout settings.
    config: Config,
    /// Set by `stop_listening`, consumed by the next connection that closes
    /// without sending a header.
    stop: AtomicBool,
}

impl Server {
    /// Binds a server at `path` with default timeouts.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_config(path, Config::default())
    }

    /// Binds a server with explicit timeouts.
    ///
    /// Creates missing parent directories and replaces a stale socket
    /// entry at `path`.
    pub fn with_config(path: impl AsRef<Path>, config: Config) -> Self {
        let path = path.as_ref().to_path_buf();
        let listener = bind(&path, &config);
        match &listener {
            Ok(_) => info!(path = %path.display(), "listening"),
            Err(e) => warn!(error = %e, "server unusable"),
        }
        Self {
            listener,
            path,
            config,
            stop: AtomicBool::new(false),
        }
    }

    /// Socket path this server was created for.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the socket was bound successfully.
    pub const fn is_valid(&self) -> bool {
        self.listener.is_ok()
    }

    /// The construction error of an invalid server.
    pub fn init_error(&self) -> Option<&Error> {
        self.listener.as_ref().err()
    }

    /// Serves one connection.
    ///
    /// Waits up to the configured timeout for a client, then receives its
    /// header, acknowledges it, receives the message and sends back
    /// whatever `handler(header, message)` returns.
    ///
    /// Failures are also reported to `handler` as `(empty error message,
    /// error message)`; its return value is ignored then. Failures caused by
    /// [`stop_listening`](Self::stop_listening) are not reported.
    ///
    /// Returns an empty message on success, or an error message describing
    /// the first failure.
    pub fn listen<F>(&self, mut handler: F) -> Message
    where
        F: FnMut(&Message, &Message) -> Message,
    {
        match self.serve_one(&mut handler) {
            Ok(()) => Message::empty(),
            Err(e) => {
                let description = e.to_string();
                if e.is_stop() {
                    debug!(reason = %description, "listen interrupted");
                } else {
                    if matches!(e, Error::WaitTimeout(_)) {
                        debug!(error = %description, "listen idle");
                    } else {
                        warn!(error = %description, "listen failed");
                    }
                    handler(&Message::text("", true), &Message::error(description.clone()));
                }
                Message::error(description)
            }
        }
    }

    /// Unblocks a concurrent [`listen`](Self::listen) that is waiting for a
    /// connection.
    ///
    /// Records a stop request and wakes the wait with a payload-less
    /// connection to the server's own socket. The woken `listen` returns an
    /// error without calling its handler. Clients already queued ahead of
    /// the wake-up connection are still served; the first `listen` that
    /// accepts the wake-up connection is the one that stops.
    ///
    /// Returns `false` if the server is invalid or the wake-up connection
    /// could not be made.
    pub fn stop_listening(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.stop.store(true, Ordering::Release);
        match sys::Stream::connect(&self.path, self.config.timeout()) {
            Ok(_wake) => {
                debug!(path = %self.path.display(), "stop requested");
                true
            }
            // The flag stays set: clearing it could drop a concurrent request.
            Err(e) => {
                warn!(error = %e, "stop_listening failed");
                false
            }
        }
    }

    /// One connection's worth of work; every early return closes the
    /// accepted stream.
    fn serve_one<F>(&self, handler: &mut F) -> Result<()>
    where
        F: FnMut(&Message, &Message) -> Message,
    {
        let listener = self
            .listener
            .as_ref()
            .map_err(|e| Error::Init(e.to_string()))?;
        let (timeout, quiet) = (self.config.timeout(), self.config.quiet());

        let ready = listener
            .wait(timeout)
            .map_err(|source| Error::Socket { op: "poll", source })?;
        if !ready {
            return Err(Error::WaitTimeout(timeout));
        }

        let mut stream = listener
            .accept()
            .map_err(|source| Error::Socket { op: "accept", source })?;
        stream
            .set_timeout(timeout)
            .map_err(|source| Error::Socket { op: "setsockopt", source })?;

        let header = match lipc_proto::drain(&mut stream, timeout, quiet) {
            Ok(bytes) => Message::from(bytes),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(if self.stop.swap(false, Ordering::AcqRel) {
                    Error::Stopped
                } else {
                    Error::Hangup
                });
            }
            Err(source) => return Err(Error::Io { op: "header recv", source }),
        };
        debug!(bytes = header.size(), "header received");

        stream
            .send_all(&[ACK])
            .map_err(|source| Error::Io { op: "ack send", source })?;

        let message = lipc_proto::drain(&mut stream, timeout, quiet)
            .map(Message::from)
            .map_err(|source| Error::Io { op: "message recv", source })?;
        debug!(bytes = message.size(), "message received");

        let response = handler(&header, &message);
        lipc_proto::send(&mut stream, &response)
            .map_err(|source| Error::Io { op: "response send", source })?;
        debug!(bytes = response.size(), "response sent");
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.listener.is_ok() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Validates `path`, prepares the filesystem and binds the listener.
fn bind(path: &Path, config: &Config) -> Result<sys::Listener> {
    addr::validate(path)?;
    addr::prepare(path)?;
    sys::Listener::bind(path, config.timeout())
}
