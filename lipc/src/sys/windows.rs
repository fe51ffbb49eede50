//! Winsock `AF_UNIX` stream sockets (Windows 10 1803 and later).

#![allow(unsafe_code)]

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use lipc_proto::{Channel, Recv};
use windows_sys::Win32::Networking::WinSock::{
    AF_UNIX, INVALID_SOCKET, POLLRDNORM, SO_RCVTIMEO, SO_SNDTIMEO, SOCK_STREAM, SOCKADDR,
    SOCKADDR_UN, SOCKET, SOCKET_ERROR, SOL_SOCKET, SOMAXCONN, WSACleanup, WSADATA,
    WSAEWOULDBLOCK, WSAGetLastError, WSAPOLLFD, WSAPoll, WSAStartup, accept, bind, closesocket,
    connect, listen, recv, send, setsockopt, socket,
};

use super::{LocalListener, LocalStream};
use crate::error::{Error, Result};

/// Winsock 2.2.
const WINSOCK_VERSION: u16 = 0x0202;

/// Live Winsock initialization shared by every open socket.
static WINSOCK: Mutex<Weak<Winsock>> = Mutex::new(Weak::new());

/// Holds one `WSAStartup` reference; released with `WSACleanup` on drop.
///
/// Acquired on first socket creation and kept alive by the sockets that
/// need it, so the subsystem is torn down once the last socket closes.
#[derive(Debug)]
struct Winsock;

impl Winsock {
    /// Returns the current initialization, starting Winsock if needed.
    fn acquire() -> io::Result<Arc<Self>> {
        let mut slot = WINSOCK.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = slot.upgrade() {
            return Ok(live);
        }
        // SAFETY: WSADATA is plain old data; all-zero is a valid value.
        let mut data: WSADATA = unsafe { std::mem::zeroed() };
        // SAFETY: data is a valid out-pointer for the duration of the call.
        let ret = unsafe { WSAStartup(WINSOCK_VERSION, &raw mut data) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        let live = Arc::new(Self);
        *slot = Arc::downgrade(&live);
        Ok(live)
    }
}

impl Drop for Winsock {
    fn drop(&mut self) {
        // SAFETY: balances the WSAStartup in `acquire`.
        unsafe { WSACleanup() };
    }
}

/// Size of `SOCKADDR_UN::sun_path`.
pub(crate) fn sun_path_capacity() -> usize {
    // SAFETY: SOCKADDR_UN is plain old data; all-zero is a valid value.
    let addr: SOCKADDR_UN = unsafe { std::mem::zeroed() };
    addr.sun_path.len()
}

/// Owned Winsock socket handle, closed on drop.
#[derive(Debug)]
struct Socket {
    /// Raw handle.
    raw: SOCKET,
    /// Keeps Winsock initialized while the handle is open.
    winsock: Arc<Winsock>,
}

impl Socket {
    /// Creates an `AF_UNIX` stream socket.
    fn new() -> io::Result<Self> {
        let winsock = Winsock::acquire()?;
        // SAFETY: plain socket() call; the handle is owned right below.
        let raw = unsafe { socket(i32::from(AF_UNIX), SOCK_STREAM, 0) };
        if raw == INVALID_SOCKET {
            return Err(last_error());
        }
        Ok(Self { raw, winsock })
    }

    /// Applies `timeout` as both `SO_SNDTIMEO` and `SO_RCVTIMEO`.
    fn set_timeouts(&self, timeout: Duration) -> io::Result<()> {
        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1);
        for opt in [SO_SNDTIMEO, SO_RCVTIMEO] {
            // SAFETY: ms outlives the call and the length matches its size.
            let ret = unsafe {
                setsockopt(
                    self.raw,
                    SOL_SOCKET,
                    opt,
                    std::ptr::from_ref(&ms).cast(),
                    size_of::<u32>() as i32,
                )
            };
            if ret == SOCKET_ERROR {
                return Err(last_error());
            }
        }
        Ok(())
    }

    /// Waits up to `wait` for the socket to become readable.
    fn poll_readable(&self, wait: Duration) -> io::Result<bool> {
        let mut pfd = WSAPOLLFD {
            fd: self.raw,
            events: POLLRDNORM,
            revents: 0,
        };
        let ms = i32::try_from(wait.as_micros().div_ceil(1000)).unwrap_or(i32::MAX);
        // SAFETY: pfd is a valid WSAPOLLFD for the duration of the call.
        match unsafe { WSAPoll(&raw mut pfd, 1, ms) } {
            0 => Ok(false),
            SOCKET_ERROR => Err(last_error()),
            _ => Ok(true),
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // SAFETY: raw is a valid handle owned by this value.
        unsafe { closesocket(self.raw) };
    }
}

/// Listening Winsock `AF_UNIX` socket.
#[derive(Debug)]
pub(crate) struct Listener(Socket);

impl LocalListener for Listener {
    type Stream = Stream;

    fn bind(path: &Path, timeout: Duration) -> Result<Self> {
        let addr = sockaddr(path).map_err(|source| Error::Socket { op: "bind", source })?;
        let sock = Socket::new().map_err(|source| Error::Socket { op: "socket", source })?;
        sock.set_timeouts(timeout)
            .map_err(|source| Error::Socket { op: "setsockopt", source })?;

        // SAFETY: addr is an initialized SOCKADDR_UN and the length matches its size.
        let ret = unsafe {
            bind(
                sock.raw,
                std::ptr::from_ref(&addr).cast::<SOCKADDR>(),
                size_of::<SOCKADDR_UN>() as i32,
            )
        };
        if ret == SOCKET_ERROR {
            return Err(Error::Socket {
                op: "bind",
                source: last_error(),
            });
        }
        let backlog = i32::try_from(SOMAXCONN).unwrap_or(i32::MAX);
        // SAFETY: sock is a valid, bound stream socket.
        if unsafe { listen(sock.raw, backlog) } == SOCKET_ERROR {
            return Err(Error::Socket {
                op: "listen",
                source: last_error(),
            });
        }
        Ok(Self(sock))
    }

    fn wait(&self, timeout: Duration) -> io::Result<bool> {
        self.0.poll_readable(timeout)
    }

    fn accept(&self) -> io::Result<Stream> {
        // SAFETY: the peer address is not requested, so null pointers are allowed.
        let raw = unsafe { accept(self.0.raw, std::ptr::null_mut(), std::ptr::null_mut()) };
        if raw == INVALID_SOCKET {
            return Err(last_error());
        }
        Ok(Stream(Socket {
            raw,
            winsock: Arc::clone(&self.0.winsock),
        }))
    }
}

/// Connected Winsock `AF_UNIX` stream.
#[derive(Debug)]
pub(crate) struct Stream(Socket);

impl LocalStream for Stream {
    fn connect(path: &Path, timeout: Duration) -> Result<Self> {
        let addr = sockaddr(path).map_err(|source| Error::Socket { op: "connect", source })?;
        let sock = Socket::new().map_err(|source| Error::Socket { op: "socket", source })?;
        sock.set_timeouts(timeout)
            .map_err(|source| Error::Socket { op: "setsockopt", source })?;

        // SAFETY: addr is an initialized SOCKADDR_UN and the length matches its size.
        let ret = unsafe {
            connect(
                sock.raw,
                std::ptr::from_ref(&addr).cast::<SOCKADDR>(),
                size_of::<SOCKADDR_UN>() as i32,
            )
        };
        if ret == SOCKET_ERROR {
            return Err(Error::Socket {
                op: "connect",
                source: last_error(),
            });
        }
        Ok(Self(sock))
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.0.set_timeouts(timeout)
    }
}

impl Channel for Stream {
    fn send_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let len = i32::try_from(buf.len()).unwrap_or(i32::MAX);
            // SAFETY: buf is valid for reads of `len` bytes.
            let n = unsafe { send(self.0.raw, buf.as_ptr(), len, 0) };
            match usize::try_from(n) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => buf = &buf[n..],
                Err(_) => return Err(last_error()),
            }
        }
        Ok(())
    }

    fn recv_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Recv> {
        if !self.0.poll_readable(wait)? {
            return Ok(Recv::Idle);
        }
        let len = i32::try_from(buf.len()).unwrap_or(i32::MAX);
        // SAFETY: buf is valid for writes of `len` bytes. The socket was just
        // reported readable, so recv returns without waiting.
        let n = unsafe { recv(self.0.raw, buf.as_mut_ptr(), len, 0) };
        match usize::try_from(n) {
            Ok(0) => Ok(Recv::Closed),
            Ok(n) => Ok(Recv::Data(n)),
            Err(_) => {
                let err = last_error();
                if err.raw_os_error() == Some(WSAEWOULDBLOCK) {
                    Ok(Recv::Idle)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Builds the `SOCKADDR_UN` for `path`.
fn sockaddr(path: &Path) -> io::Result<SOCKADDR_UN> {
    let bytes = path
        .to_str()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path is not valid UTF-8"))?
        .as_bytes();
    // SAFETY: SOCKADDR_UN is plain old data; all-zero is a valid value.
    let mut addr: SOCKADDR_UN = unsafe { std::mem::zeroed() };

    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path does not fit in SOCKADDR_UN",
        ));
    }
    if bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains a NUL byte",
        ));
    }

    addr.sun_family = AF_UNIX;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as _;
    }
    Ok(addr)
}

/// The calling thread's last Winsock error.
fn last_error() -> io::Error {
    // SAFETY: WSAGetLastError only reads thread-local state.
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}
