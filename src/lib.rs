//! sockmux - socket multiplexer with interchangeable I/O backends.
//!
//! This crate manages many concurrent outbound stream connections and
//! delivers every inbound chunk to a single user-supplied callback. The
//! low-level I/O strategy is pluggable: a readiness-polling backend (a
//! dedicated thread batch-polling the armed sockets) and a completion
//! backend (per-socket asynchronous receives that re-arm themselves and
//! complete on a worker pool) sit behind the same [`SocketMux`] contract
//! with identical observable behavior.
//!
//! # Quick Start
//!
//! ```ignore
//! use sockmux::{Engine, Mux};
//!
//! // Create a multiplexer with the default (readiness) backend.
//! let mux = Mux::new(|handle, result| {
//!     match result {
//!         Ok(bytes) if !bytes.is_empty() => {
//!             println!("received {} bytes", bytes.len());
//!             true // keep the connection armed
//!         }
//!         Ok(_) => false,  // peer closed
//!         Err(e) => {
//!             eprintln!("read failed: {e}");
//!             false // return value is ignored on error; never re-armed
//!         }
//!     }
//! })?;
//!
//! let handle = mux.open("127.0.0.1:6380".parse()?, None, true)?;
//! handle.write(b"*1\r\n$4\r\nPING\r\n")?;
//! ```
//!
//! # Backend Selection
//!
//! By default the readiness backend is used. The completion backend can be
//! selected through the builder:
//!
//! ```ignore
//! use sockmux::{Engine, Mux};
//!
//! let mux = Mux::builder()
//!     .engine(Engine::Completion)
//!     .build(|_handle, result| result.map(|b| !b.is_empty()).unwrap_or(false))?;
//! ```
//!
//! # Callback Contract
//!
//! The callback receives `(handle, Ok(bytes))` on a successful receive
//! (empty bytes when the peer performed an orderly shutdown) or
//! `(handle, Err(e))` with the mapped native error. Its boolean return
//! requests re-arming, and is honored only when the result was `Ok`:
//! after any error the connection is de-armed no matter what the callback
//! returns. A panic inside the callback is caught and treated as a
//! decline; it never takes down the polling loop or a dispatcher worker.

mod builder;
mod completion;
mod error;
mod mux;
mod pending;
mod readiness;
mod socket;
mod sys;
mod types;

// Re-exports
pub use builder::MuxBuilder;
pub use completion::CompletionMux;
pub use error::Error;
pub use mux::{SocketMux, UserToken};
pub use readiness::ReadinessMux;
pub use socket::SocketHandle;
pub use types::{Engine, MuxCapabilities};

use std::io;
use std::sync::Arc;

/// Convenience wrapper for creating multiplexers.
pub struct Mux;

impl Mux {
    /// Create a new multiplexer with default settings.
    ///
    /// Uses the readiness-polling backend.
    #[allow(clippy::new_ret_no_self)]
    pub fn new<F>(on_read: F) -> io::Result<Box<dyn SocketMux>>
    where
        F: Fn(&Arc<SocketHandle>, Result<&[u8], io::Error>) -> bool + Send + Sync + 'static,
    {
        MuxBuilder::new().build(on_read)
    }

    /// Create a builder for configuring the multiplexer.
    pub fn builder() -> MuxBuilder {
        MuxBuilder::new()
    }
}
