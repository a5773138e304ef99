//! Onion pipeline error types

use thiserror::Error;

use crate::http::status;

/// Errors from parsing and dispatching onion requests
#[derive(Debug, Error)]
pub enum OnionError {
    /// The envelope or an inner layer failed to decrypt
    #[error("Invalid ciphertext")]
    InvalidCiphertext,

    /// The inner JSON was missing, malformed, or not an object
    #[error("Invalid json")]
    InvalidJson,

    /// The requested next hop is not a known node
    #[error("Next node not found")]
    UnknownPeer,

    /// The next hop did not answer within the session deadline
    #[error("Request time out")]
    PeerTimeout,

    /// The next hop answered with fewer than two message parts
    #[error("Invalid response from snode")]
    PeerMalformedReply,

    /// The source exceeded its allowed request rate
    #[error("Too many requests")]
    RateLimited,

    /// We are not an active swarm member yet
    #[error("Snode not ready")]
    NotReady,

    /// The relay target failed the URL filter
    #[error("Invalid url")]
    BadUrl,

    /// The request body exceeds the maximum accepted size
    #[error("Payload too large")]
    PayloadTooLarge,
}

impl OnionError {
    /// The plain response this error surfaces as
    pub fn to_response(&self) -> crate::http::Response {
        crate::http::Response::new(self.status(), self.to_string())
    }

    /// The status code this error surfaces as
    pub fn status(&self) -> u16 {
        match self {
            OnionError::InvalidCiphertext => status::BAD_REQUEST,
            OnionError::InvalidJson => status::BAD_REQUEST,
            OnionError::UnknownPeer => status::BAD_GATEWAY,
            OnionError::PeerTimeout => status::GATEWAY_TIMEOUT,
            OnionError::PeerMalformedReply => status::INTERNAL_SERVER_ERROR,
            OnionError::RateLimited => status::TOO_MANY_REQUESTS,
            OnionError::NotReady => status::SERVICE_UNAVAILABLE,
            OnionError::BadUrl => status::BAD_REQUEST,
            OnionError::PayloadTooLarge => status::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Result type for onion operations
pub type OnionResult<T> = Result<T, OnionError>;
