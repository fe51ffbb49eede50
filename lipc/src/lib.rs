//! One-shot request/response IPC over filesystem-addressed local sockets.
//!
//! A [`Server`] binds a socket path and answers one connection per
//! [`Server::listen`] call with a handler. A [`Client`] opens a fresh
//! connection per [`Client::send`], delivers a header and a message, and
//! returns the server's response. Works on Linux, macOS and Windows 10
//! (1803+) through `AF_UNIX`.
//!
//! Neither side ever panics or returns `Err` on the public path: failures
//! are rendered into an error-flagged [`Message`]. Use
//! [`Client::try_send`] for the typed [`Error`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::thread;
//!
//! use lipc::{Client, Message, Server};
//!
//! let server = Server::new("/tmp/lipc/demo.sock");
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         server.listen(|header, message| {
//!             Message::from(format!("{}: {}", header.as_str(), message.as_str()))
//!         })
//!     });
//!
//!     let client = Client::new("/tmp/lipc/demo.sock");
//!     let reply = client.send(&Message::from("greet"), &Message::from("hello"));
//!     assert_eq!(reply.as_str(), "greet: hello");
//! });
//! ```

mod addr;
mod client;
mod config;
mod error;
mod server;
mod sys;

pub use addr::max_path_len;
pub use client::Client;
pub use config::{Config, DEFAULT_QUIET, DEFAULT_TIMEOUT};
pub use error::{Error, Result};
pub use lipc_proto::{ACK, Message};
pub use server::Server;
