//! Error types for tokenlens.

use thiserror::Error;

/// Result type alias for tokenlens operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tokenlens.
#[derive(Error, Debug)]
pub enum Error {
    /// Tokenizer construction failed - bad vocabulary or merge data.
    #[error("tokenizer configuration error: {0}")]
    TokenizerConfig(String),

    /// A sampling parameter is out of its valid range. Recoverable: the
    /// caller corrects the parameter and retries.
    #[error("invalid sampling parameter: {0}")]
    InvalidSamplingParameter(String),

    /// The inference backend has not been initialized yet.
    #[error("inference backend not loaded")]
    BackendUnavailable,

    /// The backend call raised while running. The original message is kept.
    #[error("inference execution failed: {0}")]
    Execution(String),

    /// A requested accelerated execution mode is not available. Distinct
    /// from `Execution` so callers can fall back to the default mode.
    #[error("execution mode not supported: {0}")]
    CapabilityUnsupported(String),

    /// No response from the backend within the configured bound.
    #[error("inference request timed out")]
    Timeout,

    /// The worker task is gone and its channels are closed.
    #[error("inference worker closed")]
    WorkerClosed,

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
