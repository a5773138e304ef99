//! Swarmnode Network Layer
//!
//! The peer-to-peer message bus (length-prefixed multipart frames over
//! TCP) and the outbound HTTP(S) client used when an onion request
//! exits toward an external server.

pub mod bus;
pub mod error;
pub mod http;

pub use bus::{BusClient, BusServer};
pub use error::{NetError, NetResult};
pub use http::HttpRelay;
