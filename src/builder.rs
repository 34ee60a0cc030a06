//! Multiplexer builder with fluent API.

use crate::completion::CompletionMux;
use crate::mux::{ReadCallback, SocketMux};
use crate::readiness::ReadinessMux;
use crate::socket::SocketHandle;
use crate::types::Engine;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Resolved configuration shared by both backends.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) recv_buffer_size: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) wake_timeout: Duration,
    pub(crate) completion_workers: usize,
    pub(crate) tcp_nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recv_buffer_size: 8 * 1024,
            poll_interval: Duration::from_millis(50),
            wake_timeout: Duration::from_secs(1),
            completion_workers: 2,
            tcp_nodelay: true,
        }
    }
}

/// Builder for creating a multiplexer with custom configuration.
///
/// # Example
///
/// ```ignore
/// use sockmux::{Engine, Mux};
///
/// let mux = Mux::builder()
///     .engine(Engine::Completion)
///     .recv_buffer_size(16 * 1024)
///     .completion_workers(4)
///     .build(|_handle, result| result.is_ok())?;
/// ```
#[derive(Debug, Clone)]
pub struct MuxBuilder {
    engine: Engine,
    config: Config,
}

impl Default for MuxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            engine: Engine::Auto,
            config: Config::default(),
        }
    }

    /// Set the I/O engine to use.
    ///
    /// - `Auto`: pick an engine automatically (default, currently readiness)
    /// - `Readiness`: dedicated polling-loop backend
    /// - `Completion`: asynchronous re-arming backend
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Set the receive buffer size.
    ///
    /// The readiness backend uses one loop-owned scratch buffer of this
    /// size; the completion backend pins one buffer of this size per
    /// connection. Default: 8KB
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the native readiness-poll timeout.
    ///
    /// Bounds how long one batch readiness check may block.
    /// Default: 50ms
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the fallback wake timeout for an idle polling loop.
    ///
    /// An idle loop re-checks for disposal at least this often even when
    /// nothing is armed. Default: 1s
    pub fn wake_timeout(mut self, timeout: Duration) -> Self {
        self.config.wake_timeout = timeout;
        self
    }

    /// Set the completion backend's worker count.
    ///
    /// Completions for different connections are delivered concurrently on
    /// this many threads. Only applies to the completion backend.
    /// Default: 2
    pub fn completion_workers(mut self, workers: usize) -> Self {
        self.config.completion_workers = workers.max(1);
        self
    }

    /// Enable or disable `TCP_NODELAY` on opened connections.
    /// Default: true
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    /// Build the multiplexer with the configured settings.
    pub fn build<F>(self, on_read: F) -> io::Result<Box<dyn SocketMux>>
    where
        F: Fn(&Arc<SocketHandle>, Result<&[u8], io::Error>) -> bool + Send + Sync + 'static,
    {
        let on_read: ReadCallback = Box::new(on_read);
        match self.engine {
            Engine::Auto | Engine::Readiness => Ok(Box::new(ReadinessMux::with_config(
                on_read,
                self.config,
            )?)),
            Engine::Completion => Ok(Box::new(CompletionMux::with_config(
                on_read,
                self.config,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = MuxBuilder::new();
        assert_eq!(builder.engine, Engine::Auto);
        assert_eq!(builder.config.recv_buffer_size, 8 * 1024);
        assert_eq!(builder.config.poll_interval, Duration::from_millis(50));
        assert_eq!(builder.config.wake_timeout, Duration::from_secs(1));
        assert_eq!(builder.config.completion_workers, 2);
        assert!(builder.config.tcp_nodelay);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = MuxBuilder::new()
            .engine(Engine::Completion)
            .recv_buffer_size(4096)
            .poll_interval(Duration::from_millis(10))
            .wake_timeout(Duration::from_millis(200))
            .completion_workers(4)
            .tcp_nodelay(false);
        assert_eq!(builder.engine, Engine::Completion);
        assert_eq!(builder.config.recv_buffer_size, 4096);
        assert_eq!(builder.config.poll_interval, Duration::from_millis(10));
        assert_eq!(builder.config.wake_timeout, Duration::from_millis(200));
        assert_eq!(builder.config.completion_workers, 4);
        assert!(!builder.config.tcp_nodelay);
    }

    #[test]
    fn test_builder_workers_clamped() {
        let builder = MuxBuilder::new().completion_workers(0);
        assert_eq!(builder.config.completion_workers, 1);
    }

    #[test]
    fn test_builder_build_readiness() {
        let mux = MuxBuilder::new()
            .engine(Engine::Readiness)
            .build(|_, _| false)
            .unwrap();
        assert_eq!(mux.engine(), Engine::Readiness);
    }

    #[test]
    fn test_builder_build_completion() {
        let mux = MuxBuilder::new()
            .engine(Engine::Completion)
            .build(|_, _| false)
            .unwrap();
        assert_eq!(mux.engine(), Engine::Completion);
    }

    #[test]
    fn test_builder_build_auto_resolves_to_readiness() {
        let mux = MuxBuilder::new().build(|_, _| false).unwrap();
        assert_eq!(mux.engine(), Engine::Readiness);
    }
}
