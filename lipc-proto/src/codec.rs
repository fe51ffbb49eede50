//! Drain-receive and send helpers over any [`Channel`].
//!
//! Payloads are not framed. A receive step reads until the peer goes quiet:
//! the first read may wait the full step timeout, every later read only
//! waits a short quiescence window.

use std::io;
use std::time::Duration;

use crate::Message;

/// Acknowledgement byte the server sends after receiving a header.
pub const ACK: u8 = 1;

/// Size of the scratch buffer used per receive call.
const CHUNK: usize = 4096;

/// Outcome of one bounded receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Recv {
    /// `n` bytes were written to the front of the buffer.
    Data(usize),
    /// The peer closed its end.
    Closed,
    /// Nothing arrived before the wait elapsed.
    Idle,
}

/// Connected byte stream with a receive-with-deadline primitive.
pub trait Channel {
    /// Writes all of `buf`, bounded by the channel's send timeout.
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Waits up to `wait` for data and reads what is available into `buf`.
    ///
    /// A zero `wait` only checks for data that already arrived.
    fn recv_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Recv>;
}

/// Sends the payload of `msg` in full.
pub fn send(ch: &mut impl Channel, msg: &Message) -> io::Result<()> {
    ch.send_all(msg.as_bytes())
}

/// Receives everything the peer sends for one protocol step.
///
/// The first read waits up to `timeout`; once data starts arriving, reads
/// continue until nothing more shows up within `quiet` or the peer closes.
///
/// A successful result is never empty:
/// - no data within `timeout` fails with [`io::ErrorKind::TimedOut`];
/// - a peer that closes before sending fails with
///   [`io::ErrorKind::UnexpectedEof`];
/// - an I/O error after partial data discards what was received.
pub fn drain(ch: &mut impl Channel, timeout: Duration, quiet: Duration) -> io::Result<Vec<u8>> {
    let mut chunk = [0u8; CHUNK];

    let mut out = match ch.recv_within(&mut chunk, timeout)? {
        Recv::Data(n) => chunk[..n].to_vec(),
        Recv::Closed => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed without sending data",
            ));
        }
        Recv::Idle => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no data within {timeout:?}"),
            ));
        }
    };

    loop {
        match ch.recv_within(&mut chunk, quiet)? {
            Recv::Data(n) => out.extend_from_slice(&chunk[..n]),
            Recv::Closed | Recv::Idle => return Ok(out),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// One scripted delivery.
    enum Step {
        Bytes(Vec<u8>),
        Idle,
        Closed,
        Fail(io::ErrorKind),
    }

    /// Channel that replays a script and records what it was asked.
    #[derive(Default)]
    struct Scripted {
        steps: VecDeque<Step>,
        waits: Vec<Duration>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: steps.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl Channel for Scripted {
        fn send_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.sent.extend_from_slice(buf);
            Ok(())
        }

        fn recv_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Recv> {
            self.waits.push(wait);
            match self.steps.pop_front() {
                Some(Step::Bytes(mut bytes)) => {
                    // Small receive buffers see a long delivery in pieces.
                    if bytes.len() > buf.len() {
                        let rest = bytes.split_off(buf.len());
                        self.steps.push_front(Step::Bytes(rest));
                    }
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(Recv::Data(bytes.len()))
                }
                Some(Step::Idle) | None => Ok(Recv::Idle),
                Some(Step::Closed) => Ok(Recv::Closed),
                Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
            }
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(10);

    #[test]
    fn reassembles_split_deliveries() {
        let mut ch = Scripted::new([
            Step::Bytes(b"hel".to_vec()),
            Step::Bytes(b"lo ".to_vec()),
            Step::Bytes(b"world".to_vec()),
            Step::Idle,
        ]);
        let got = drain(&mut ch, TIMEOUT, QUIET).unwrap();
        assert_eq!(got, b"hello world");
        assert_eq!(ch.waits, vec![TIMEOUT, QUIET, QUIET, QUIET]);
    }

    #[test]
    fn payload_larger_than_one_chunk() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut ch = Scripted::new([Step::Bytes(payload.clone()), Step::Closed]);
        assert_eq!(drain(&mut ch, TIMEOUT, QUIET).unwrap(), payload);
    }

    #[test]
    fn nothing_before_timeout() {
        let mut ch = Scripted::new([Step::Idle]);
        let err = drain(&mut ch, TIMEOUT, QUIET).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn peer_closed_before_sending() {
        let mut ch = Scripted::new([Step::Closed]);
        let err = drain(&mut ch, TIMEOUT, QUIET).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn error_after_partial_data_discards_it() {
        let mut ch = Scripted::new([
            Step::Bytes(b"partial".to_vec()),
            Step::Fail(io::ErrorKind::ConnectionReset),
        ]);
        let err = drain(&mut ch, TIMEOUT, QUIET).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn send_writes_whole_payload() {
        let mut ch = Scripted::default();
        send(&mut ch, &Message::from(vec![0, 1, 2])).unwrap();
        send(&mut ch, &Message::from("ok")).unwrap();
        assert_eq!(ch.sent, b"\0\x01\x02ok");
    }
}
