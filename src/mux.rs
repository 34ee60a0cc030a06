//! Multiplexer trait definition.

use crate::error::Error;
use crate::socket::SocketHandle;
use crate::types::{Engine, MuxCapabilities};
use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

/// Opaque per-connection context supplied by the consumer at `open` time.
///
/// The multiplexer never inspects it; retrieve it inside the callback with
/// [`SocketHandle::user_token`] and downcast.
pub type UserToken = Box<dyn Any + Send + Sync>;

/// The user read callback, shared by every connection of a multiplexer.
///
/// Invoked with the received bytes on success (empty on an orderly peer
/// shutdown) or the mapped native error. The return value requests
/// re-arming and is honored only for `Ok` results.
pub type ReadCallback =
    Box<dyn Fn(&Arc<SocketHandle>, Result<&[u8], io::Error>) -> bool + Send + Sync>;

/// Socket multiplexer trait - abstracts over the readiness and completion
/// backends.
///
/// All backends provide the same observable behavior: outbound stream
/// connections are opened through the multiplexer, optionally armed for
/// reading, written to synchronously, and every inbound chunk is handed to
/// the one callback supplied at construction.
///
/// # Usage Pattern
///
/// ```ignore
/// let mux = Mux::new(|handle, result| { /* consume bytes */ true })?;
///
/// let handle = mux.open(addr, None, true)?;
/// handle.write(b"hello")?;
/// // inbound data now flows into the callback until it declines or the
/// // connection fails
/// ```
pub trait SocketMux: Send + Sync {
    /// Establish a connected stream socket to `endpoint`.
    ///
    /// The handle is registered with the multiplexer and, when `read` is
    /// true, immediately armed for reading. On connect failure nothing is
    /// registered and [`Error::Connect`] is returned.
    fn open(
        &self,
        endpoint: SocketAddr,
        user_token: Option<UserToken>,
        read: bool,
    ) -> Result<Arc<SocketHandle>, Error>;

    /// Arm the handle for its next inbound data. Idempotent: arming an
    /// already-armed handle is a no-op.
    fn arm_read(&self, handle: &Arc<SocketHandle>) -> Result<(), Error>;

    /// Send `bytes` fully, looping the underlying send until everything is
    /// transmitted or an error occurs.
    ///
    /// Concurrent writes to different handles do not interfere; concurrent
    /// writes to the same handle are the caller's responsibility to avoid.
    fn write(&self, handle: &SocketHandle, bytes: &[u8]) -> Result<(), Error>;

    /// Dispose the multiplexer: one-shot, idempotent.
    ///
    /// Marks the instance disposed so concurrent operations fail promptly,
    /// then closes every registered socket exactly once, discarding errors
    /// from sockets that are already broken. An async operation already in
    /// flight at the native layer may still complete afterwards; such
    /// completions are dropped once their handle is torn down.
    fn dispose(&self);

    /// Whether disposal has begun.
    fn is_disposed(&self) -> bool;

    /// Whether the handle is currently armed for reading (or has a receive
    /// in flight, for the completion backend).
    fn is_armed(&self, handle: &SocketHandle) -> bool;

    /// The engine servicing this multiplexer.
    fn engine(&self) -> Engine;

    /// Capabilities of the active backend.
    fn capabilities(&self) -> MuxCapabilities;

    /// Number of registered connections.
    fn connection_count(&self) -> usize;
}

/// Backend entry points reachable from a handle's convenience methods.
pub(crate) trait MuxCore: Send + Sync {
    fn core_arm(&self, handle: &SocketHandle) -> Result<(), Error>;
    fn core_write(&self, handle: &SocketHandle, bytes: &[u8]) -> Result<(), Error>;
}

/// Run the user callback and fold its answer into the continuation decision.
///
/// The handle stays armed only when the callback returns true for a
/// successful read. A panicking callback counts as a decline and must not
/// unwind into the backend.
pub(crate) fn deliver(
    cb: &ReadCallback,
    handle: &Arc<SocketHandle>,
    result: Result<&[u8], io::Error>,
) -> bool {
    let ok = result.is_ok();
    let again = match panic::catch_unwind(AssertUnwindSafe(|| cb(handle, result))) {
        Ok(again) => again,
        Err(_) => {
            trace!(fd = handle.raw_fd(), "read callback panicked");
            false
        }
    };
    again && ok
}
