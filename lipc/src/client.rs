//! Client role: one connect/exchange/close cycle per [`Client::send`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use lipc_proto::{ACK, Channel, Message};
use tracing::{debug, warn};

use crate::addr;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sys::{self, LocalStream};

/// Sends requests to a [`Server`](crate::Server) listening at a socket path.
///
/// Every [`send`](Self::send) opens a fresh connection. A client can be
/// shared between threads; exchanges are serialized so at most one is in
/// flight per instance.
///
/// ```no_run
/// use lipc::{Client, Message};
///
/// let client = Client::new("/tmp/lipc/server.sock");
/// let response = client.send(&Message::from("bin"), &Message::from(vec![0u8]));
/// if response.is_error() {
///     eprintln!("exchange failed: {}", response.as_str());
/// }
/// ```
#[derive(Debug)]
pub struct Client {
    /// Validated socket path, or the reason construction failed.
    addr: Result<PathBuf>,
    /// Timeout settings.
    config: Config,
    /// Serializes exchanges.
    lock: Mutex<()>,
}

impl Client {
    /// Creates a client for the server at `path` with default timeouts.
    ///
    /// Never fails: an unusable path is remembered and reported by every
    /// [`send`](Self::send).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_config(path, Config::default())
    }

    /// Creates a client with explicit timeouts.
    pub fn with_config(path: impl AsRef<Path>, config: Config) -> Self {
        let path = path.as_ref();
        let addr = addr::validate(path).map(|()| path.to_path_buf());
        if let Err(e) = &addr {
            warn!(error = %e, "client unusable");
        }
        Self {
            addr,
            config,
            lock: Mutex::new(()),
        }
    }

    /// Socket path this client connects to, if it was valid.
    pub fn path(&self) -> Option<&Path> {
        self.addr.as_deref().ok()
    }

    /// Runs one exchange and returns the server's response.
    ///
    /// Failures come back as an error-flagged [`Message`] describing the
    /// first step that failed. Empty `header` or `message` are rejected
    /// without touching the network.
    pub fn send(&self, header: &Message, message: &Message) -> Message {
        self.try_send(header, message).unwrap_or_else(|e| {
            warn!(error = %e, "send failed");
            Message::error(e.to_string())
        })
    }

    /// Like [`send`](Self::send), but returns the typed error.
    pub fn try_send(&self, header: &Message, message: &Message) -> Result<Message> {
        let path = self
            .addr
            .as_ref()
            .map_err(|e| Error::Init(e.to_string()))?;
        if header.is_empty() {
            return Err(Error::Empty("header"));
        }
        if message.is_empty() {
            return Err(Error::Empty("message"));
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (timeout, quiet) = (self.config.timeout(), self.config.quiet());

        let mut stream = sys::Stream::connect(path, timeout)?;
        debug!(path = %path.display(), "connected");

        stream
            .send_all(header.as_bytes())
            .map_err(|source| Error::Io { op: "header send", source })?;

        let ack = lipc_proto::drain(&mut stream, timeout, quiet)
            .map_err(|source| Error::Io { op: "ack recv", source })?;
        if ack.first() != Some(&ACK) {
            return Err(Error::BadAck {
                got: ack.first().copied(),
            });
        }

        stream
            .send_all(message.as_bytes())
            .map_err(|source| Error::Io { op: "message send", source })?;

        match lipc_proto::drain(&mut stream, timeout, quiet) {
            Ok(bytes) => {
                debug!(bytes = bytes.len(), "response received");
                Ok(Message::from(bytes))
            }
            // The handler produced an empty response.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(Message::empty()),
            Err(source) => Err(Error::Io {
                op: "response recv",
                source,
            }),
        }
    }
}
