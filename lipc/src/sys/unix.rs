//! `AF_UNIX` stream sockets on Linux and macOS.

#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::{Duration, Instant};

use lipc_proto::{Channel, Recv};

use super::{LocalListener, LocalStream};
use crate::error::{Error, Result};

/// A write to a closed peer fails with `EPIPE` instead of raising `SIGPIPE`.
#[cfg(not(target_vendor = "apple"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(target_vendor = "apple")]
const SEND_FLAGS: libc::c_int = 0;

/// Size of `sockaddr_un::sun_path` (108 on Linux, 104 on macOS).
pub(crate) fn sun_path_capacity() -> usize {
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_path.len()
}

/// Listening `AF_UNIX` socket.
#[derive(Debug)]
pub(crate) struct Listener(UnixListener);

impl LocalListener for Listener {
    type Stream = Stream;

    fn bind(path: &Path, timeout: Duration) -> Result<Self> {
        let (addr, len) = sockaddr(path).map_err(|source| Error::Socket { op: "bind", source })?;
        let sock = socket().map_err(|source| Error::Socket { op: "socket", source })?;
        set_timeouts(sock.as_fd(), timeout)
            .map_err(|source| Error::Socket { op: "setsockopt", source })?;

        // SAFETY: addr is an initialized sockaddr_un and len matches its size.
        if unsafe { libc::bind(sock.as_raw_fd(), std::ptr::from_ref(&addr).cast(), len) } < 0 {
            return Err(Error::Socket {
                op: "bind",
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: sock is a valid, bound stream socket.
        if unsafe { libc::listen(sock.as_raw_fd(), libc::SOMAXCONN) } < 0 {
            return Err(Error::Socket {
                op: "listen",
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self(UnixListener::from(sock)))
    }

    fn wait(&self, timeout: Duration) -> io::Result<bool> {
        poll_readable(self.0.as_fd(), timeout)
    }

    fn accept(&self) -> io::Result<Stream> {
        let (stream, _) = self.0.accept()?;
        no_sigpipe(stream.as_fd())?;
        Ok(Stream(stream))
    }
}

/// Connected `AF_UNIX` stream.
#[derive(Debug)]
pub(crate) struct Stream(UnixStream);

impl LocalStream for Stream {
    fn connect(path: &Path, timeout: Duration) -> Result<Self> {
        let (addr, len) =
            sockaddr(path).map_err(|source| Error::Socket { op: "connect", source })?;
        let sock = socket().map_err(|source| Error::Socket { op: "socket", source })?;
        // SO_SNDTIMEO also bounds a connect that blocks on a full backlog.
        set_timeouts(sock.as_fd(), timeout)
            .map_err(|source| Error::Socket { op: "setsockopt", source })?;

        loop {
            // SAFETY: addr is an initialized sockaddr_un and len matches its size.
            let ret =
                unsafe { libc::connect(sock.as_raw_fd(), std::ptr::from_ref(&addr).cast(), len) };
            if ret == 0 {
                return Ok(Self(UnixStream::from(sock)));
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(Error::Socket {
                    op: "connect",
                    source: err,
                });
            }
        }
    }

    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        set_timeouts(self.0.as_fd(), timeout)
    }
}

impl Channel for Stream {
    fn send_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            // SAFETY: buf is valid for reads of buf.len() bytes.
            let n = unsafe {
                libc::send(self.0.as_raw_fd(), buf.as_ptr().cast(), buf.len(), SEND_FLAGS)
            };
            match usize::try_from(n) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => buf = &buf[n..],
                Err(_) => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    fn recv_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Recv> {
        if !poll_readable(self.0.as_fd(), wait)? {
            return Ok(Recv::Idle);
        }
        loop {
            // SAFETY: buf is valid for writes of buf.len() bytes.
            // MSG_DONTWAIT: readiness was just reported, so this never parks.
            let n = unsafe {
                libc::recv(
                    self.0.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            match usize::try_from(n) {
                Ok(0) => return Ok(Recv::Closed),
                Ok(n) => return Ok(Recv::Data(n)),
                Err(_) => {
                    let err = io::Error::last_os_error();
                    match err.kind() {
                        io::ErrorKind::Interrupted => {}
                        io::ErrorKind::WouldBlock => return Ok(Recv::Idle),
                        _ => return Err(err),
                    }
                }
            }
        }
    }
}

/// Creates a close-on-exec `AF_UNIX` stream socket.
fn socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the descriptor is owned right below.
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly created descriptor nobody else owns.
    let sock = unsafe { OwnedFd::from_raw_fd(fd) };

    // macOS has no SOCK_CLOEXEC, so set the flag separately.
    // SAFETY: fcntl(F_SETFD) on a valid descriptor.
    if unsafe { libc::fcntl(sock.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    no_sigpipe(sock.as_fd())?;
    Ok(sock)
}

/// Apple platforms lack `MSG_NOSIGNAL`; the socket option does the same.
#[cfg(target_vendor = "apple")]
fn no_sigpipe(fd: BorrowedFd<'_>) -> io::Result<()> {
    let on: libc::c_int = 1;
    let len = libc::socklen_t::try_from(size_of::<libc::c_int>())
        .map_err(|_| io::Error::from(io::ErrorKind::Unsupported))?;
    // SAFETY: on outlives the call and len matches its size.
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            std::ptr::from_ref(&on).cast(),
            len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_vendor = "apple"))]
#[allow(clippy::unnecessary_wraps)]
const fn no_sigpipe(_fd: BorrowedFd<'_>) -> io::Result<()> {
    Ok(())
}

/// Builds the `sockaddr_un` for `path`.
fn sockaddr(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let bytes = path.as_os_str().as_bytes();
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };

    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path does not fit in sockaddr_un",
        ));
    }
    if bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains a NUL byte",
        ));
    }

    addr.sun_family = libc::sa_family_t::try_from(libc::AF_UNIX)
        .map_err(|_| io::Error::from(io::ErrorKind::Unsupported))?;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = libc::c_char::from_ne_bytes([*src]);
    }

    let len = libc::socklen_t::try_from(size_of::<libc::sockaddr_un>())
        .map_err(|_| io::Error::from(io::ErrorKind::Unsupported))?;
    Ok((addr, len))
}

/// Applies `timeout` as both `SO_SNDTIMEO` and `SO_RCVTIMEO`.
fn set_timeouts(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_usec: libc::suseconds_t::try_from(timeout.subsec_micros()).unwrap_or(0),
    };
    let len = libc::socklen_t::try_from(size_of::<libc::timeval>())
        .map_err(|_| io::Error::from(io::ErrorKind::Unsupported))?;

    for opt in [libc::SO_SNDTIMEO, libc::SO_RCVTIMEO] {
        // SAFETY: tv outlives the call and len matches its size.
        let ret = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                opt,
                std::ptr::from_ref(&tv).cast(),
                len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Waits up to `wait` for `fd` to become readable, retrying on `EINTR`.
fn poll_readable(fd: BorrowedFd<'_>, wait: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + wait;
    loop {
        let mut pfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        // SAFETY: pfd is a valid pollfd for the duration of the call.
        let ret = unsafe { libc::poll(&raw mut pfd, 1, poll_millis(remaining)) };
        match ret {
            0 => return Ok(false),
            r if r > 0 => return Ok(true),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

/// `poll(2)` timeout for `d`, rounded up so sub-millisecond waits still wait.
fn poll_millis(d: Duration) -> libc::c_int {
    libc::c_int::try_from(d.as_micros().div_ceil(1000)).unwrap_or(libc::c_int::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn capacity_matches_platform() {
        let expected = if cfg!(target_os = "linux") { 108 } else { 104 };
        assert_eq!(sun_path_capacity(), expected);
    }

    #[test]
    fn poll_millis_rounds_up() {
        assert_eq!(poll_millis(Duration::ZERO), 0);
        assert_eq!(poll_millis(Duration::from_micros(1)), 1);
        assert_eq!(poll_millis(Duration::from_millis(2000)), 2000);
    }

    #[test]
    fn sockaddr_rejects_nul() {
        let err = sockaddr(Path::new("a\0b")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn recv_within_reports_idle_data_and_close() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut a = Stream(a);
        let mut b = Stream(b);
        let mut buf = [0u8; 16];

        assert_eq!(a.recv_within(&mut buf, Duration::ZERO).unwrap(), Recv::Idle);

        b.send_all(b"ping").unwrap();
        assert_eq!(
            a.recv_within(&mut buf, Duration::from_secs(1)).unwrap(),
            Recv::Data(4)
        );
        assert_eq!(&buf[..4], b"ping");

        drop(b);
        assert_eq!(
            a.recv_within(&mut buf, Duration::from_secs(1)).unwrap(),
            Recv::Closed
        );
    }
}
