//! Native readiness glue.
//!
//! The readiness primitive is a batch check over a snapshot of socket
//! identifiers with a bounded timeout, mapped onto poll(2). Zero ready
//! descriptors on timeout is not an error.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

fn timeout_ms(timeout: Duration) -> libc::c_int {
    timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
}

/// Check which of `fds` are read-ready, waiting up to `timeout`.
///
/// Ready descriptors are collected into `ready` (cleared first). Error and
/// hangup conditions count as readable so the subsequent receive can
/// surface the real error; invalid descriptors count too, so stale entries
/// get purged by their failing receive.
pub(crate) fn poll_readable(
    fds: &[RawFd],
    timeout: Duration,
    ready: &mut Vec<RawFd>,
) -> io::Result<()> {
    ready.clear();
    if fds.is_empty() {
        return Ok(());
    }
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let rc = unsafe {
        libc::poll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            timeout_ms(timeout),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc == 0 {
        return Ok(());
    }
    const READABLE: libc::c_short =
        libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
    for p in &pollfds {
        if p.revents & READABLE != 0 {
            ready.push(p.fd);
        }
    }
    Ok(())
}

/// Receive into `buf` from `fd` without blocking.
///
/// The socket is already in non-blocking mode; `WouldBlock` means no data
/// yet, 0 means the peer performed an orderly shutdown.
pub(crate) fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let rc = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Wait up to `timeout` for `fd` to accept more outbound data.
///
/// Returns whether the descriptor signalled. Error conditions count, so a
/// retried send reports the real failure.
pub(crate) fn wait_writable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms(timeout)) };
    if rc < 0 {
        let e = io::Error::last_os_error();
        if e.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(e);
    }
    Ok(rc > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_poll_readable_empty_set() {
        let mut ready = vec![1, 2, 3];
        poll_readable(&[], Duration::from_millis(10), &mut ready).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_poll_readable_timeout_is_not_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server, _) = listener.accept().unwrap();
        let mut ready = Vec::new();
        poll_readable(&[client.as_raw_fd()], Duration::from_millis(20), &mut ready).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_poll_readable_reports_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        server.write_all(b"x").unwrap();
        let fd = client.as_raw_fd();
        let mut ready = Vec::new();
        // give loopback delivery a few tries
        for _ in 0..50 {
            poll_readable(&[fd], Duration::from_millis(20), &mut ready).unwrap();
            if !ready.is_empty() {
                break;
            }
        }
        assert_eq!(ready, vec![fd]);
    }

    #[test]
    fn test_recv_nonblocking_then_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client.set_nonblocking(true).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        let fd = client.as_raw_fd();
        let mut buf = [0u8; 16];

        let err = recv(fd, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        server.write_all(b"abc").unwrap();
        let mut ready = Vec::new();
        for _ in 0..50 {
            poll_readable(&[fd], Duration::from_millis(20), &mut ready).unwrap();
            if !ready.is_empty() {
                break;
            }
        }
        let n = recv(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    fn test_wait_writable_fresh_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server, _) = listener.accept().unwrap();
        assert!(wait_writable(client.as_raw_fd(), Duration::from_millis(100)).unwrap());
    }
}
