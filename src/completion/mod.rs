//! Asynchronous-completion backend.
//!
//! No loop thread of its own: arming a connection issues one asynchronous
//! receive which either completes inline or later on a dispatcher worker,
//! and each completion re-issues the next receive while the callback keeps
//! requesting more. One receive is in flight per connection at a time, so
//! same-connection completions are serialized by construction and the
//! pinned buffer is never shared.

mod dispatcher;

use crate::builder::Config;
use crate::error::Error;
use crate::mux::{deliver, MuxCore, ReadCallback, SocketMux, UserToken};
use crate::socket::{self, SocketHandle};
use crate::types::{Engine, MuxCapabilities};
use dispatcher::{run_poller, Dispatcher, PendingOp};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use tracing::{debug, trace};

struct Shared {
    on_read: ReadCallback,
    disposed: AtomicBool,
    handles: RwLock<HashMap<RawFd, Arc<SocketHandle>>>,
    /// Token registry: resolves a completion's bare token back to its
    /// handle. Populated at issue, removed at resolution or teardown.
    registry: Mutex<HashMap<u64, Arc<SocketHandle>>>,
    next_token: AtomicU64,
    dispatcher: Arc<Dispatcher>,
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

    /// Issue one asynchronous receive for `handle`.
    ///
    /// The immediate attempt classifies into the three native outcomes:
    /// completed inline (deliver, maybe loop), pending (queue with the
    /// dispatcher), or failed at issue time (deliver the error, never
    /// re-arm from here).
    fn arm(&self, handle: &Arc<SocketHandle>) -> Result<(), Error> {
        self.ensure_live()?;
        loop {
            let mut buf = {
                let mut slot = handle.recv.lock().unwrap();
                match slot.buf.take() {
                    Some(buf) => buf,
                    // a receive is already in flight
                    None => return Ok(()),
                }
            };
            match handle.try_recv(&mut buf) {
                Ok(n) => {
                    // inline completion
                    let again = deliver(&self.on_read, handle, Ok(&buf[..n]));
                    if again && n > 0 {
                        handle.recv.lock().unwrap().buf = Some(buf);
                        continue;
                    }
                    if again {
                        // zero-length read with a callback that insists on
                        // more: go through the dispatcher rather than spin
                        // in the caller's stack
                        self.issue(handle, buf);
                    } else {
                        handle.recv.lock().unwrap().buf = Some(buf);
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // pending: completion arrives via the dispatcher
                    self.issue(handle, buf);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                    // closed locally by a racing disposal
                    handle.recv.lock().unwrap().buf = Some(buf);
                    return Ok(());
                }
                Err(e) => {
                    handle.recv.lock().unwrap().buf = Some(buf);
                    let _ = deliver(&self.on_read, handle, Err(e));
                    return Ok(());
                }
            }
        }
    }

    /// Register a token for `handle` and queue the operation.
    fn issue(&self, handle: &Arc<SocketHandle>, buf: Box<[u8]>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.registry
            .lock()
            .unwrap()
            .insert(token, Arc::clone(handle));
        self.dispatcher.submit(PendingOp {
            token,
            fd: handle.raw_fd(),
            buf,
        });
    }

    /// Completion delivery, invoked on a dispatcher worker.
    ///
    /// Resolves the token; an unresolved token means the handle was torn
    /// down and the event is dropped along with its buffer. Otherwise the
    /// receive runs through the handle, the callback fires, and a
    /// requested continuation recurses into the arm path.
    fn complete(&self, op: PendingOp) {
        let handle = match self.registry.lock().unwrap().remove(&op.token) {
            Some(h) => h,
            None => {
                trace!(token = op.token, "completion for torn-down handle dropped");
                return;
            }
        };
        let mut buf = op.buf;
        match handle.try_recv(&mut buf) {
            Ok(n) => {
                let again = deliver(&self.on_read, &handle, Ok(&buf[..n]));
                handle.recv.lock().unwrap().buf = Some(buf);
                if again {
                    let _ = self.arm(&handle);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // readiness was spurious; put the operation back
                self.issue(&handle, buf);
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                // closed under us during teardown
                handle.recv.lock().unwrap().buf = Some(buf);
            }
            Err(e) => {
                handle.recv.lock().unwrap().buf = Some(buf);
                let _ = deliver(&self.on_read, &handle, Err(e));
            }
        }
    }

    fn write(&self, handle: &SocketHandle, bytes: &[u8]) -> Result<(), Error> {
        self.ensure_live()?;
        handle.send_all(bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::NotConnected {
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
        self.dispatcher.shutdown();
        self.registry.lock().unwrap().clear();
        let drained: Vec<Arc<SocketHandle>> = {
            let mut handles = self.handles.write().unwrap();
            handles.drain().map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.close();
        }
        debug!(closed = drained.len(), "completion multiplexer disposed");
    }
}

impl MuxCore for Shared {
    fn core_arm(&self, handle: &SocketHandle) -> Result<(), Error> {
        let handle = {
            let handles = self.handles.read().unwrap();
            handles.get(&handle.raw_fd()).cloned()
        };
        match handle {
            Some(handle) => self.arm(&handle),
            None => Err(Error::Disposed),
        }
    }

    fn core_write(&self, handle: &SocketHandle, bytes: &[u8]) -> Result<(), Error> {
        self.write(handle, bytes)
    }
}

/// Asynchronous-completion multiplexer.
///
/// Dropping the value disposes it.
pub struct CompletionMux {
    shared: Arc<Shared>,
}

impl CompletionMux {
    /// Create a new completion multiplexer with default settings.
    pub fn new<F>(on_read: F) -> io::Result<Self>
    where
        F: Fn(&Arc<SocketHandle>, Result<&[u8], io::Error>) -> bool + Send + Sync + 'static,
    {
        Self::with_config(Box::new(on_read), Config::default())
    }

    pub(crate) fn with_config(on_read: ReadCallback, cfg: Config) -> io::Result<Self> {
        let dispatcher = Arc::new(Dispatcher::new(cfg.poll_interval, cfg.wake_timeout));
        let workers = cfg.completion_workers;
        let shared = Arc::new(Shared {
            on_read,
            disposed: AtomicBool::new(false),
            handles: RwLock::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            dispatcher: Arc::clone(&dispatcher),
            cfg,
        });

        let (tx, rx) = crossbeam_channel::bounded::<PendingOp>(1024);
        thread::Builder::new()
            .name("sockmux-cq".into())
            .spawn(move || run_poller(dispatcher, tx))?;
        for i in 0..workers {
            let rx = rx.clone();
            let worker_shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("sockmux-cqw-{}", i))
                .spawn(move || {
                    while let Ok(op) = rx.recv() {
                        worker_shared.complete(op);
                    }
                    debug!("completion worker exited");
                })?;
        }

        Ok(Self { shared })
    }
}

impl SocketMux for CompletionMux {
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
        let recv_buf = vec![0u8; self.shared.cfg.recv_buffer_size].into_boxed_slice();
        let handle = Arc::new(SocketHandle::new(owner, sock, user_token, Some(recv_buf)));
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
        handle.recv.lock().unwrap().buf.is_none()
    }

    fn engine(&self) -> Engine {
        Engine::Completion
    }

    fn capabilities(&self) -> MuxCapabilities {
        MuxCapabilities::completion()
    }

    fn connection_count(&self) -> usize {
        self.shared.handles.read().unwrap().len()
    }
}

impl Drop for CompletionMux {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}
