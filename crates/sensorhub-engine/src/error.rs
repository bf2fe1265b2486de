//! Error types for the SensorHub binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! that is fatal at startup or shutdown. Per-cycle failures never reach
//! it; the aggregation loop absorbs them.

/// Top-level error for the SensorHub binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: sensorhub_core::ConfigError,
    },

    /// The HTTP/WebSocket server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: sensorhub_observer::ServerError,
    },

    /// The async runtime could not be built.
    #[error("runtime error: {source}")]
    Runtime {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A background task panicked or was aborted.
    #[error("task error: {message}")]
    Task {
        /// Description of the task failure.
        message: String,
    },
}
