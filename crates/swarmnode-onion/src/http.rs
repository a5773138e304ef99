//! Minimal response type shared across the pipeline
//!
//! The HTTP server proper lives outside this crate; the pipeline only
//! needs a status code and a body to hand back.

/// Status codes the pipeline produces
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    pub const MISDIRECTED_REQUEST: u16 = 421;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const BAD_GATEWAY: u16 = 502;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const GATEWAY_TIMEOUT: u16 = 504;
}

/// A response travelling back along the onion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(status::OK, body)
    }

    pub fn is_ok(&self) -> bool {
        self.status == status::OK
    }
}
