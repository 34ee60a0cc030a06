//! Readiness-polling backend.
//!
//! One dedicated thread owns the polling loop: it drains snapshots of the
//! pending-read set, batch-checks them for readability with a short native
//! timeout, performs the non-blocking receives itself and dispatches to
//! the read callback. Arming and disposal may happen from any thread; they
//! only touch the lock-guarded pending set and the disposed flag.

use crate::builder::Config;
use crate::error::Error;
use crate::mux::{deliver, MuxCore, ReadCallback, SocketMux, UserToken};
use crate::pending::PendingReads;
use crate::socket::{self, SocketHandle};
use crate::sys;
use crate::types::{Engine, MuxCapabilities};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::thread;
use tracing::{debug, warn};

struct Shared {
    on_read: ReadCallback,
    disposed: AtomicBool,
    handles: RwLock<HashMap<RawFd, Arc<SocketHandle>>>,
    pending: PendingReads,
    cfg: Config,
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn arm(&self, handle: &SocketHandle) -> Result<(), Error> {
        self.ensure_live()?;
        self.pending.arm(handle.raw_fd());
        Ok(())
    }

    fn write(&self, handle: &SocketHandle, bytes: &[u8]) -> Result<(), Error> {
        self.ensure_live()?;
        handle.send_all(bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::NotConnected {
                // the socket was taken by a racing disposal
                Error::Disposed
            } else {
                Error::Io(e)
            }
        })
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pending.clear();
        self.pending.notify_all();
        let drained: Vec<Arc<SocketHandle>> = {
            let mut handles = self.handles.write().unwrap();
            handles.drain().map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.close();
        }
        debug!(closed = drained.len(), "readiness multiplexer disposed");
    }
}

impl MuxCore for Shared {
    fn core_arm(&self, handle: &SocketHandle) -> Result<(), Error> {
        self.arm(handle)
    }

    fn core_write(&self, handle: &SocketHandle, bytes: &[u8]) -> Result<(), Error> {
        self.write(handle, bytes)
    }
}

/// Readiness-polling multiplexer.
///
/// Dropping the value disposes it.
pub struct ReadinessMux {
    shared: Arc<Shared>,
}

impl ReadinessMux {
    /// Create a new readiness multiplexer with default settings.
    pub fn new<F>(on_read: F) -> io::Result<Self>
    where
        F: Fn(&Arc<SocketHandle>, Result<&[u8], io::Error>) -> bool + Send + Sync + 'static,
    {
        Self::with_config(Box::new(on_read), Config::default())
    }

    pub(crate) fn with_config(on_read: ReadCallback, cfg: Config) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            on_read,
            disposed: AtomicBool::new(false),
            handles: RwLock::new(HashMap::new()),
            pending: PendingReads::new(),
            cfg,
        });
        let loop_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("sockmux-poll".into())
            .spawn(move || poll_loop(loop_shared))?;
        Ok(Self { shared })
    }
}

impl SocketMux for ReadinessMux {
    fn open(
        &self,
        endpoint: SocketAddr,
        user_token: Option<UserToken>,
        read: bool,
    ) -> Result<Arc<SocketHandle>, Error> {
        self.shared.ensure_live()?;
        let sock = socket::connect(endpoint, self.shared.cfg.tcp_nodelay)
            .map_err(|source| Error::Connect {
                addr: endpoint,
                source,
            })?;
        let shared: Arc<dyn MuxCore> = self.shared.clone();
        let owner: Weak<dyn MuxCore> = Arc::downgrade(&shared);
        let handle = Arc::new(SocketHandle::new(owner, sock, user_token, None));
        self.shared
            .handles
            .write()
            .unwrap()
            .insert(handle.raw_fd(), Arc::clone(&handle));
        if read {
            self.shared.arm(&handle)?;
        }
        Ok(handle)
    }

    fn arm_read(&self, handle: &Arc<SocketHandle>) -> Result<(), Error> {
        self.shared.arm(handle)
    }

    fn write(&self, handle: &SocketHandle, bytes: &[u8]) -> Result<(), Error> {
        self.shared.write(handle, bytes)
    }

    fn dispose(&self) {
        self.shared.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    fn is_armed(&self, handle: &SocketHandle) -> bool {
        self.shared.pending.contains(handle.raw_fd())
    }

    fn engine(&self) -> Engine {
        Engine::Readiness
    }

    fn capabilities(&self) -> MuxCapabilities {
        MuxCapabilities::readiness()
    }

    fn connection_count(&self) -> usize {
        self.shared.handles.read().unwrap().len()
    }
}

impl Drop for ReadinessMux {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

/// The dedicated polling loop.
///
/// Re-snapshots the pending set every iteration instead of mutating a live
/// structure during dispatch, so a callback that re-arms or writes cannot
/// invalidate the iteration, and the set's lock is never held across the
/// native poll.
fn poll_loop(shared: Arc<Shared>) {
    let mut scratch = vec![0u8; shared.cfg.recv_buffer_size];
    let mut snapshot: Vec<RawFd> = Vec::new();
    let mut ready: Vec<RawFd> = Vec::new();

    while !shared.is_disposed() {
        if !shared
            .pending
            .snapshot_or_wait(&mut snapshot, shared.cfg.wake_timeout)
        {
            continue;
        }

        if let Err(e) = sys::poll_readable(&snapshot, shared.cfg.poll_interval, &mut ready) {
            if e.kind() != io::ErrorKind::Interrupted {
                warn!(error = %e, "readiness poll failed");
            }
            continue;
        }

        for &fd in &ready {
            let handle = {
                let handles = shared.handles.read().unwrap();
                match handles.get(&fd) {
                    Some(h) => Arc::clone(h),
                    // raced with teardown
                    None => continue,
                }
            };
            let keep = match handle.try_recv(&mut scratch) {
                Ok(n) => deliver(&shared.on_read, &handle, Ok(&scratch[..n])),
                // spurious wakeup: not actually readable, stay armed
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
                // closed locally while we held the handle
                Err(e) if e.kind() == io::ErrorKind::NotConnected => false,
                Err(e) => deliver(&shared.on_read, &handle, Err(e)),
            };
            if !keep {
                shared.pending.disarm(fd);
            }
        }
    }
    debug!("readiness poll loop exited");
}
