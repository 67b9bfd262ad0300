//! Gateway error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend was used before `connect` (or after `close`).
    #[error("backend '{0}' is not connected")]
    NotConnected(String),

    /// A backend call or transport operation failed. The message is what
    /// clients see behind the `Backend error:` prefix.
    #[error("{0}")]
    Backend(String),

    #[error("cache store error: {0}")]
    CacheStore(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
