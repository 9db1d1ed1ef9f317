//! Error types shared across the crate.

use thiserror::Error;

/// Convenience alias used by all fallible SPINDLE operations.
pub type SpindleResult<T> = Result<T, SpindleError>;

/// Errors produced by the control loop, command channel, and collaborators.
#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("measurement error: {0}")]
    Measurement(String),
}

impl SpindleError {
    /// Create a configuration error from any message.
    pub fn config(msg: impl Into<String>) -> Self {
        SpindleError::Config(msg.into())
    }

    /// Create a measurement error from any message.
    pub fn measurement(msg: impl Into<String>) -> Self {
        SpindleError::Measurement(msg.into())
    }
}
