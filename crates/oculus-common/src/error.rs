//! Common error types for Oculus.

use thiserror::Error;

/// Result type alias using Oculus' error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for shared Oculus operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed session token or share URL
    #[error("invalid session: {0}")]
    InvalidSession(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create an invalid-session error from any displayable type.
    pub fn invalid_session(msg: impl std::fmt::Display) -> Self {
        Self::InvalidSession(msg.to_string())
    }
}
