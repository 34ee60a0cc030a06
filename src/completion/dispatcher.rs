//! The completion dispatcher.
//!
//! Plays the role of the native asynchronous-receive runtime: issued
//! operations are queued here, a poller thread watches their sockets for
//! readability, and ready operations are handed to a worker pool which
//! performs the receive and delivers the completion. Workers have no
//! thread affinity; completions for different connections land on
//! whichever worker is free.

use crate::sys;
use crossbeam_channel::Sender;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// One outstanding asynchronous receive.
///
/// Owns the connection's pinned buffer for the duration of the operation.
/// Only the operation token travels back to the issuing side; the handle is
/// re-resolved from the token registry at completion time.
pub(crate) struct PendingOp {
    pub(crate) token: u64,
    pub(crate) fd: RawFd,
    pub(crate) buf: Box<[u8]>,
}

/// Queue of outstanding operations plus the poller's wake protocol.
///
/// Mirrors the pending-read set: the queue lock doubles as the monitor for
/// "work arrived", with a bounded fallback wait so shutdown is noticed
/// when idle.
pub(crate) struct Dispatcher {
    ops: Mutex<Vec<PendingOp>>,
    cond: Condvar,
    shutdown: AtomicBool,
    poll_interval: Duration,
    wake_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(poll_interval: Duration, wake_timeout: Duration) -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            poll_interval,
            wake_timeout,
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queue an operation for completion.
    pub(crate) fn submit(&self, op: PendingOp) {
        let mut ops = self.ops.lock().unwrap();
        ops.push(op);
        if ops.len() == 1 {
            self.cond.notify_one();
        }
    }

    /// Stop the poller and drop all queued operations.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut ops = self.ops.lock().unwrap();
        ops.clear();
        self.cond.notify_all();
    }
}

/// The poller loop: wait for queued operations, batch-check their sockets
/// for readability, move ready operations to the worker channel.
///
/// Exits on shutdown or when every worker is gone; dropping `tx` is what
/// lets the workers drain and exit in turn.
pub(crate) fn run_poller(dispatcher: Arc<Dispatcher>, tx: Sender<PendingOp>) {
    let mut fds: Vec<RawFd> = Vec::new();
    let mut ready: Vec<RawFd> = Vec::new();
    let mut dispatch: Vec<PendingOp> = Vec::new();

    while !dispatcher.is_shutdown() {
        {
            let mut ops = dispatcher.ops.lock().unwrap();
            if ops.is_empty() {
                let (guard, _timed_out) = dispatcher
                    .cond
                    .wait_timeout(ops, dispatcher.wake_timeout)
                    .unwrap();
                ops = guard;
                if ops.is_empty() {
                    continue;
                }
            }
            fds.clear();
            fds.extend(ops.iter().map(|op| op.fd));
        }

        if let Err(e) = sys::poll_readable(&fds, dispatcher.poll_interval, &mut ready) {
            if e.kind() != io::ErrorKind::Interrupted {
                warn!(error = %e, "completion poll failed");
            }
            continue;
        }
        if ready.is_empty() {
            continue;
        }

        // pull ready ops out under the lock, deliver them without it: the
        // channel may block when the workers are busy, and a blocked worker
        // may itself be submitting a re-arm
        {
            let mut ops = dispatcher.ops.lock().unwrap();
            let mut i = 0;
            while i < ops.len() {
                if ready.contains(&ops[i].fd) {
                    dispatch.push(ops.swap_remove(i));
                } else {
                    i += 1;
                }
            }
        }
        for op in dispatch.drain(..) {
            if tx.send(op).is_err() {
                debug!("completion workers gone, poller exiting");
                return;
            }
        }
    }
    debug!("completion poller exited");
}
