//! Core error types

use thiserror::Error;

/// Errors from the membership and configuration layer
#[derive(Debug, Error)]
pub enum CoreError {
    /// Client pubkey has the wrong length or is not hex
    #[error("Invalid user pubkey: {0}")]
    InvalidUserPubkey(String),

    /// Configuration file could not be read
    #[error("Could not read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Could not parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration failed validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
