//! Wire layer for lipc local-socket exchanges.
//!
//! A connection carries exactly one exchange:
//!
//! ```text
//! client ── header ──▶ server
//! client ◀── ACK ───── server
//! client ── message ─▶ server
//! client ◀─ response ─ server
//! ```
//!
//! There are no length prefixes. Each step's payload is every byte that
//! arrives before the peer goes quiet (see [`drain`]).

mod codec;
mod message;

pub use codec::{ACK, Channel, Recv, drain, send};
pub use message::Message;
