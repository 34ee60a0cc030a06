//! Core types for the sockmux multiplexer.

/// I/O engine selection.
///
/// Determines which backend services a multiplexer's connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Engine {
    /// Automatically select an engine.
    ///
    /// Currently resolves to the readiness backend, which works everywhere
    /// and needs only a single polling thread.
    #[default]
    Auto,

    /// Readiness polling: a dedicated thread batch-checks the armed sockets
    /// for readability and performs the receives itself.
    Readiness,

    /// Asynchronous completion: each armed socket has one in-flight receive
    /// that completes on a worker pool and re-arms itself while the callback
    /// keeps requesting more.
    Completion,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Auto => write!(f, "auto"),
            Engine::Readiness => write!(f, "readiness"),
            Engine::Completion => write!(f, "completion"),
        }
    }
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Engine::Auto),
            "readiness" | "poll" | "select" => Ok(Engine::Readiness),
            "completion" | "async" => Ok(Engine::Completion),
            _ => Err(format!("unknown engine: {}", s)),
        }
    }
}

bitflags::bitflags! {
    /// Capabilities of the active backend.
    ///
    /// Lets consumers adapt to the backend selected at construction without
    /// matching on [`Engine`] directly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MuxCapabilities: u32 {
        /// Reads are driven by batch readiness polling over the armed set.
        const READINESS_POLLING = 1 << 0;
        /// Reads are driven by asynchronous completion callbacks delivered
        /// on arbitrary worker threads.
        const COMPLETION_CALLBACKS = 1 << 1;
        /// Arming may complete inline: data already buffered by the kernel
        /// is delivered to the callback before `arm_read` returns.
        const INLINE_COMPLETION = 1 << 2;
    }
}

impl MuxCapabilities {
    /// Capabilities of the readiness backend.
    pub fn readiness() -> Self {
        Self::READINESS_POLLING
    }

    /// Capabilities of the completion backend.
    pub fn completion() -> Self {
        Self::COMPLETION_CALLBACKS | Self::INLINE_COMPLETION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_engine_default() {
        assert_eq!(Engine::default(), Engine::Auto);
    }

    #[test]
    fn test_engine_display() {
        assert_eq!(format!("{}", Engine::Auto), "auto");
        assert_eq!(format!("{}", Engine::Readiness), "readiness");
        assert_eq!(format!("{}", Engine::Completion), "completion");
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!(Engine::from_str("auto").unwrap(), Engine::Auto);
        assert_eq!(Engine::from_str("AUTO").unwrap(), Engine::Auto);
        assert_eq!(Engine::from_str("readiness").unwrap(), Engine::Readiness);
        assert_eq!(Engine::from_str("poll").unwrap(), Engine::Readiness);
        assert_eq!(Engine::from_str("select").unwrap(), Engine::Readiness);
        assert_eq!(Engine::from_str("completion").unwrap(), Engine::Completion);
        assert_eq!(Engine::from_str("async").unwrap(), Engine::Completion);
    }

    #[test]
    fn test_engine_from_str_error() {
        let result = Engine::from_str("iocp");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("unknown engine"));
    }

    #[test]
    fn test_capabilities_disjoint() {
        let r = MuxCapabilities::readiness();
        let c = MuxCapabilities::completion();
        assert!(r.contains(MuxCapabilities::READINESS_POLLING));
        assert!(!r.contains(MuxCapabilities::COMPLETION_CALLBACKS));
        assert!(c.contains(MuxCapabilities::COMPLETION_CALLBACKS));
        assert!(c.contains(MuxCapabilities::INLINE_COMPLETION));
        assert!(!c.contains(MuxCapabilities::READINESS_POLLING));
    }
}
