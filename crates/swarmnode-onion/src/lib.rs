//! Swarmnode Onion Request Pipeline
//!
//! An onion request arrives as a framed `ciphertext ‖ json` envelope.
//! This crate unwraps one layer, classifies the decrypted inner payload
//! and executes the resulting action: answer locally, forward to the
//! next node, or forward to an external server.

pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod http;
pub mod processor;

pub use dispatcher::{
    parse_onion_request, OnionDispatcher, OnionMetadata, PeerBus, PeerError, RpcHandler,
    ServerRelay,
};
pub use error::{OnionError, OnionResult};
pub use frame::{encode_payload, parse_payload, FramedPayload};
pub use http::Response;
pub use processor::{is_server_url_allowed, process_inner_request, ParseError, ParsedOnion};
