use std::io;
use std::net::SocketAddr;

/// Errors returned by the multiplexer's synchronous operations.
///
/// Per-read errors never appear here: they are delivered as values through
/// the read callback's `Result` parameter. Errors hit while force-closing
/// sockets during disposal are swallowed entirely.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Establishing the outbound connection failed. Never retried.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The multiplexer has been disposed; the operation was rejected.
    #[error("multiplexer is disposed")]
    Disposed,

    /// An I/O error outside the read path, e.g. a failed send.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
