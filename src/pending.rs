//! The pending-read set and its wake protocol.
//!
//! A single lock guards the membership and doubles as the monitor for
//! "set became non-empty". Arming inserts and pulses a waiter on the
//! empty-to-non-empty transition; the polling loop waits here with a
//! bounded fallback timeout so disposal is noticed even when idle, and
//! snapshots the membership before releasing the lock so native polling is
//! never serialized behind `arm`.

use std::os::unix::io::RawFd;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub(crate) struct PendingReads {
    fds: Mutex<Vec<RawFd>>,
    cond: Condvar,
}

impl PendingReads {
    pub(crate) fn new() -> Self {
        Self {
            fds: Mutex::new(Vec::new()),
            cond: Condvar::new(),
        }
    }

    /// Insert `fd`. Arming an already-armed fd is a no-op.
    pub(crate) fn arm(&self, fd: RawFd) {
        let mut fds = self.fds.lock().unwrap();
        if !fds.contains(&fd) {
            fds.push(fd);
            if fds.len() == 1 {
                self.cond.notify_one();
            }
        }
    }

    /// Remove `fd`. Removing an absent fd is a no-op.
    pub(crate) fn disarm(&self, fd: RawFd) {
        let mut fds = self.fds.lock().unwrap();
        if let Some(i) = fds.iter().position(|&f| f == fd) {
            fds.swap_remove(i);
        }
    }

    pub(crate) fn contains(&self, fd: RawFd) -> bool {
        self.fds.lock().unwrap().contains(&fd)
    }

    pub(crate) fn len(&self) -> usize {
        self.fds.lock().unwrap().len()
    }

    pub(crate) fn clear(&self) {
        self.fds.lock().unwrap().clear();
    }

    /// Wake any waiter, e.g. so a disposing multiplexer's loop re-checks
    /// its exit flag promptly.
    pub(crate) fn notify_all(&self) {
        let _fds = self.fds.lock().unwrap();
        self.cond.notify_all();
    }

    /// Copy the current membership into `out`.
    ///
    /// When the set is empty, first waits up to `timeout` for it to become
    /// non-empty. Returns false if it still is; the caller loops and
    /// re-checks its exit condition.
    pub(crate) fn snapshot_or_wait(&self, out: &mut Vec<RawFd>, timeout: Duration) -> bool {
        let mut fds = self.fds.lock().unwrap();
        if fds.is_empty() {
            let (guard, _timed_out) = self.cond.wait_timeout(fds, timeout).unwrap();
            fds = guard;
            if fds.is_empty() {
                return false;
            }
        }
        out.clear();
        out.extend_from_slice(&fds);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_arm_idempotent() {
        let pending = PendingReads::new();
        pending.arm(3);
        pending.arm(3);
        pending.arm(3);
        assert_eq!(pending.len(), 1);
        assert!(pending.contains(3));
    }

    #[test]
    fn test_disarm_absent_is_noop() {
        let pending = PendingReads::new();
        pending.disarm(42);
        assert_eq!(pending.len(), 0);
        pending.arm(1);
        pending.disarm(1);
        pending.disarm(1);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_snapshot_copies_membership() {
        let pending = PendingReads::new();
        pending.arm(5);
        pending.arm(7);
        let mut out = vec![99];
        assert!(pending.snapshot_or_wait(&mut out, Duration::from_millis(10)));
        out.sort_unstable();
        assert_eq!(out, vec![5, 7]);
        // the snapshot is a copy, not a drain
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_wait_returns_false_while_empty() {
        let pending = PendingReads::new();
        let mut out = Vec::new();
        assert!(!pending.snapshot_or_wait(&mut out, Duration::from_millis(50)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_arm_wakes_waiter() {
        let pending = Arc::new(PendingReads::new());
        let waiter = Arc::clone(&pending);
        let t = thread::spawn(move || {
            // consume the way the poll loop does: re-check until non-empty
            let mut out = Vec::new();
            let start = Instant::now();
            while start.elapsed() < Duration::from_secs(5) {
                if waiter.snapshot_or_wait(&mut out, Duration::from_secs(1)) {
                    return Some(out);
                }
            }
            None
        });
        thread::sleep(Duration::from_millis(50));
        pending.arm(11);
        let out = t.join().unwrap();
        assert_eq!(out, Some(vec![11]));
    }

    #[test]
    fn test_clear() {
        let pending = PendingReads::new();
        pending.arm(1);
        pending.arm(2);
        pending.clear();
        assert_eq!(pending.len(), 0);
    }
}
