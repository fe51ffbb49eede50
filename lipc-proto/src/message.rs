//! Message container exchanged between client and server.

use std::sync::OnceLock;

/// Canonical storage of a [`Message`] payload.
///
/// Exactly one variant owns the bytes; every view is derived from it.
#[derive(Debug)]
enum Payload {
    /// Buffer handed over by its producer.
    Owned(Box<[u8]>),
    /// Byte sequence.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
}

impl Payload {
    /// Borrows the canonical bytes.
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Owned(buf) => buf,
            Self::Bytes(bytes) => bytes,
            Self::Text(text) => text.as_bytes(),
        }
    }
}

/// An immutable byte payload plus an error flag.
///
/// Messages are move-only. Error messages carry a human-readable
/// description as their payload.
///
/// ```
/// use lipc_proto::Message;
///
/// let msg = Message::from(&b"bin\0"[..]);
/// assert_eq!(msg.size(), 4);
/// assert_eq!(msg.as_bytes(), b"bin\0");
/// assert!(!msg.is_error());
///
/// let err = Message::error("connect() failed");
/// assert!(err.is_error());
/// assert_eq!(err.as_str(), "connect() failed");
/// ```
#[derive(Debug)]
pub struct Message {
    /// Canonical bytes.
    payload: Payload,
    /// Whether this message describes a failure.
    is_error: bool,
    /// Lazily decoded text view for byte payloads.
    text: OnceLock<String>,
}

impl Message {
    /// Creates an empty, non-error message.
    pub const fn empty() -> Self {
        Self::with_payload(Payload::Bytes(Vec::new()), false)
    }

    /// Creates a text message with an explicit error flag.
    pub fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self::with_payload(Payload::Text(text.into()), is_error)
    }

    /// Creates an error message carrying `description`.
    pub fn error(description: impl Into<String>) -> Self {
        Self::text(description, true)
    }

    /// Wraps `payload` without copying it.
    const fn with_payload(payload: Payload, is_error: bool) -> Self {
        Self {
            payload,
            is_error,
            text: OnceLock::new(),
        }
    }

    /// Returns `true` if this message describes a failure.
    pub const fn is_error(&self) -> bool {
        self.is_error
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.as_bytes().len()
    }

    /// Payload size in bytes. Same as [`size`](Self::size).
    pub fn len(&self) -> usize {
        self.size()
    }

    /// Returns `true` if the payload is zero bytes long.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Raw payload bytes, exactly as received or constructed.
    pub fn as_bytes(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    /// Text view of the payload.
    ///
    /// Byte payloads are decoded on first access (invalid UTF-8 sequences
    /// become `U+FFFD`) and the result is cached. Use
    /// [`as_bytes`](Self::as_bytes) for byte-exact access.
    pub fn as_str(&self) -> &str {
        match &self.payload {
            Payload::Text(text) => text,
            payload => self
                .text
                .get_or_init(|| String::from_utf8_lossy(payload.as_bytes()).into_owned()),
        }
    }

    /// Consumes the message and returns its payload bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self.payload {
            Payload::Owned(buf) => buf.into_vec(),
            Payload::Bytes(bytes) => bytes,
            Payload::Text(text) => text.into_bytes(),
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.is_error == other.is_error && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Message {}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Box<[u8]>> for Message {
    /// Takes ownership of `buf`; the message becomes its sole owner.
    fn from(buf: Box<[u8]>) -> Self {
        Self::with_payload(Payload::Owned(buf), false)
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self::with_payload(Payload::Bytes(bytes), false)
    }
}

impl From<&[u8]> for Message {
    fn from(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::text(text, false)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text, false)
    }
}
