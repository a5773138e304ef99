//! Network error types

use thiserror::Error;

/// Errors from the bus and relay transports
#[derive(Debug, Error)]
pub enum NetError {
    /// Underlying socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the maximum accepted size
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// A frame did not follow the multipart layout
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The peer did not answer in time
    #[error("Request timed out")]
    Timeout,
}

/// Result type for network operations
pub type NetResult<T> = Result<T, NetError>;
