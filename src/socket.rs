//! Connection handles and socket-level glue.

use crate::error::Error;
use crate::mux::MuxCore;
use crate::sys;
use socket2::{Domain, Protocol, Socket, Type};
use std::any::Any;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Mutex, Weak};
use std::time::Duration;
use tracing::trace;

/// How long a draining write parks between retries when the kernel send
/// buffer is full.
const SEND_RETRY_TIMEOUT: Duration = Duration::from_millis(50);

/// The completion backend's per-handle receive state.
///
/// `buf` is the pinned receive buffer. `None` means an asynchronous receive
/// is outstanding and owns the buffer; taking it is what makes arming
/// idempotent. The boxed slice's heap storage never moves while the
/// operation holds it.
pub(crate) struct RecvSlot {
    pub(crate) buf: Option<Box<[u8]>>,
}

/// One open outbound connection.
///
/// Owns its native socket exclusively. The socket is released exactly once,
/// when the owning multiplexer disposes (or when the last clone of the
/// handle drops afterwards).
pub struct SocketHandle {
    owner: Weak<dyn MuxCore>,
    fd: RawFd,
    sock: Mutex<Option<Socket>>,
    user: Option<Box<dyn Any + Send + Sync>>,
    pub(crate) recv: Mutex<RecvSlot>,
}

impl SocketHandle {
    pub(crate) fn new(
        owner: Weak<dyn MuxCore>,
        sock: Socket,
        user: Option<Box<dyn Any + Send + Sync>>,
        recv_buf: Option<Box<[u8]>>,
    ) -> Self {
        let fd = sock.as_raw_fd();
        Self {
            owner,
            fd,
            sock: Mutex::new(Some(sock)),
            user,
            recv: Mutex::new(RecvSlot { buf: recv_buf }),
        }
    }

    /// The native socket identifier.
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// The opaque context supplied at `open`, if any.
    pub fn user_token(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.user.as_deref()
    }

    /// The remote address, while the socket is open.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        let guard = self.sock.lock().unwrap();
        guard
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .and_then(|a| a.as_socket())
    }

    /// Arm this handle for its next inbound data.
    ///
    /// Equivalent to `mux.arm_read(handle)`.
    pub fn read(&self) -> Result<(), Error> {
        match self.owner.upgrade() {
            Some(core) => core.core_arm(self),
            None => Err(Error::Disposed),
        }
    }

    /// Send `bytes` fully on this connection.
    ///
    /// Equivalent to `mux.write(handle, bytes)`.
    pub fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        match self.owner.upgrade() {
            Some(core) => core.core_write(self, bytes),
            None => Err(Error::Disposed),
        }
    }

    /// Non-blocking receive into `buf`.
    ///
    /// `NotConnected` is the local-close sentinel: the socket was taken by
    /// disposal while the caller still held the handle. The lock pins the
    /// socket open for the duration of the receive, so `fd` cannot be
    /// recycled under the syscall.
    pub(crate) fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let guard = self.sock.lock().unwrap();
        if guard.is_none() {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        sys::recv(self.fd, buf)
    }

    /// Send all of `bytes`, retrying through short writes and full send
    /// buffers until drained or failed.
    ///
    /// The socket lock is taken per attempt, never across the writability
    /// wait, so disposal and reads are not blocked behind a slow peer.
    pub(crate) fn send_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut rest = bytes;
        while !rest.is_empty() {
            let sent = {
                let guard = self.sock.lock().unwrap();
                let sock = guard
                    .as_ref()
                    .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
                match sock.send(rest) {
                    Ok(n) => Some(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => return Err(e),
                }
            };
            match sent {
                Some(n) => rest = &rest[n..],
                None => {
                    sys::wait_writable(self.fd, SEND_RETRY_TIMEOUT)?;
                }
            }
        }
        Ok(())
    }

    /// Force-close the native socket. Idempotent; errors are discarded.
    pub(crate) fn close(&self) {
        let sock = self.sock.lock().unwrap().take();
        if let Some(sock) = sock {
            if let Err(e) = sock.shutdown(Shutdown::Both) {
                trace!(fd = self.fd, error = %e, "shutdown during teardown");
            }
            // dropping the socket closes the fd; close errors are ignored
        }
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle").field("fd", &self.fd).finish()
    }
}

/// Establish a connected TCP socket to `endpoint`.
///
/// The connect itself is blocking; the socket is switched to non-blocking
/// mode once established, before any multiplexer sees it.
pub(crate) fn connect(endpoint: SocketAddr, nodelay: bool) -> io::Result<Socket> {
    let domain = match endpoint {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.connect(&endpoint.into())?;
    socket.set_nonblocking(true)?;
    if nodelay {
        socket.set_nodelay(true)?;
    }
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let sock = connect(addr, true).unwrap();
        assert!(sock.as_raw_fd() >= 0);
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = connect(addr, false);
        assert!(result.is_err());
    }
}
