//! Onion request dispatch
//!
//! Executes the action a parsed onion layer asks for. Each request runs
//! as one async task: decrypt, classify, then either answer from the
//! local RPC subsystem, forward to the next node over the peer bus, or
//! forward to an external server. Collaborators sit behind traits so
//! the pipeline can be exercised without a network.
//!
//! Error wrapping rules: failures the *client* must read (bad inner
//! json, rejected relay URL) travel back encrypted under the request's
//! ephemeral key; transport-level failures (unknown peer, timeouts) go
//! back in the clear to the immediate caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use swarmnode_core::{NodeRecord, SwarmTracker, SwarmView};
use swarmnode_crypto::{ChannelCipher, Ed25519Pubkey, EncType, X25519Pubkey};

use crate::error::OnionError;
use crate::http::{status, Response};
use crate::processor::{is_server_url_allowed, process_inner_request, ParseError, ParsedOnion};

/// Per-request metadata travelling alongside the ciphertext
#[derive(Debug, Clone)]
pub struct OnionMetadata {
    /// The requester's ephemeral X25519 key; responses encrypt to it
    pub ephem_key: X25519Pubkey,
    /// Cipher for this layer's response
    pub enc_type: EncType,
    /// Hop counter; senders may start it anywhere to hide their depth
    pub hop_no: u32,
}

impl OnionMetadata {
    pub fn new(ephem_key: X25519Pubkey) -> Self {
        Self {
            ephem_key,
            enc_type: EncType::default(),
            hop_no: 0,
        }
    }
}

/// Parse a client-facing onion request body (the `/onion_req/v2`
/// entry): a framed envelope whose JSON half carries the metadata.
///
/// `ephemeral_key` is required; `enc_type` and `hop_no` are optional.
pub fn parse_onion_request(body: &[u8]) -> crate::error::OnionResult<(Vec<u8>, OnionMetadata)> {
    let frame = crate::frame::parse_payload(body)?;

    let ephem_hex = frame
        .json
        .get("ephemeral_key")
        .and_then(serde_json::Value::as_str)
        .ok_or(OnionError::InvalidJson)?;
    let ephem_key = X25519Pubkey::from_hex(ephem_hex).map_err(|_| OnionError::InvalidJson)?;

    let enc_type = match frame.json.get("enc_type") {
        Some(value) => {
            let name = value.as_str().ok_or(OnionError::InvalidJson)?;
            EncType::parse(name).map_err(|_| OnionError::InvalidJson)?
        }
        None => EncType::default(),
    };

    let hop_no = frame
        .json
        .get("hop_no")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;

    Ok((
        frame.ciphertext,
        OnionMetadata {
            ephem_key,
            enc_type,
            hop_no,
        },
    ))
}

/// Transport-level failure talking to a peer
#[derive(Debug)]
pub enum PeerError {
    /// No reply within the deadline
    Timeout,
    /// Could not reach the peer at all
    Unreachable(String),
}

/// The peer-to-peer message bus, as the pipeline sees it
#[async_trait]
pub trait PeerBus: Send + Sync {
    /// Forward an onion payload to `node` and await its multipart
    /// reply, normally `[status_ascii, body]`.
    async fn send_onion_req(
        &self,
        node: &NodeRecord,
        metadata: &OnionMetadata,
        payload: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>, PeerError>;
}

/// Outbound HTTP(S) for relay-to-server exits
#[async_trait]
pub trait ServerRelay: Send + Sync {
    async fn post(
        &self,
        protocol: &str,
        host: &str,
        port: u16,
        target: &str,
        payload: Vec<u8>,
    ) -> Result<Response, String>;
}

/// The local RPC subsystem fed by terminal onion requests
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Response;
}

/// Executes parsed onion requests
pub struct OnionDispatcher {
    cipher: Arc<ChannelCipher>,
    tracker: Arc<SwarmTracker>,
    peer_bus: Arc<dyn PeerBus>,
    server_relay: Arc<dyn ServerRelay>,
    rpc: Arc<dyn RpcHandler>,
    our_ed25519: Ed25519Pubkey,
    /// Bounded worker pool; an exhausted pool answers 503 immediately
    workers: Arc<Semaphore>,
    session_timeout: Duration,
}

impl OnionDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cipher: Arc<ChannelCipher>,
        tracker: Arc<SwarmTracker>,
        peer_bus: Arc<dyn PeerBus>,
        server_relay: Arc<dyn ServerRelay>,
        rpc: Arc<dyn RpcHandler>,
        our_ed25519: Ed25519Pubkey,
        max_workers: usize,
        session_timeout: Duration,
    ) -> Self {
        Self {
            cipher,
            tracker,
            peer_bus,
            server_relay,
            rpc,
            our_ed25519,
            workers: Arc::new(Semaphore::new(max_workers)),
            session_timeout,
        }
    }

    /// Entry point for one layer of an onion request.
    ///
    /// The response callback contract of the surrounding servers is
    /// satisfied by construction here: every path produces exactly one
    /// `Response`.
    pub async fn process_onion_req(&self, ciphertext: &[u8], metadata: OnionMetadata) -> Response {
        let Ok(_permit) = self.workers.try_acquire() else {
            return Response::new(status::SERVICE_UNAVAILABLE, "Service unavailable");
        };

        if !self.tracker.is_ready() {
            return Response::new(
                OnionError::NotReady.status(),
                format!("{}: {}", OnionError::NotReady, self.our_ed25519),
            );
        }

        debug!(hop = metadata.hop_no, "process_onion_req");

        // The snapshot taken here serves the whole request
        let view = self.tracker.view();

        let parsed = match self
            .cipher
            .decrypt(metadata.enc_type, ciphertext, &metadata.ephem_key)
        {
            Ok(plaintext) => process_inner_request(&plaintext),
            Err(e) => {
                warn!(
                    len = ciphertext.len(),
                    enc_type = %metadata.enc_type,
                    "Error decrypting onion request: {e}"
                );
                ParsedOnion::Error(ParseError::InvalidCiphertext)
            }
        };

        match tokio::time::timeout(self.session_timeout, self.dispatch(parsed, &metadata, &view))
            .await
        {
            Ok(response) => response,
            Err(_) => OnionError::PeerTimeout.to_response(),
        }
    }

    async fn dispatch(
        &self,
        parsed: ParsedOnion,
        metadata: &OnionMetadata,
        view: &SwarmView,
    ) -> Response {
        match parsed {
            ParsedOnion::Terminal {
                body,
                want_json,
                want_base64,
            } => {
                debug!("We are the final destination in the onion request");
                let res = self.rpc.handle(&body).await;
                self.wrap_response(res, metadata, want_json, want_base64)
            }

            ParsedOnion::RelayToNode {
                ciphertext,
                ephemeral_key,
                enc_type,
                next_node,
            } => {
                self.relay_to_node(ciphertext, ephemeral_key, enc_type, next_node, metadata, view)
                    .await
            }

            ParsedOnion::RelayToServer {
                payload,
                host,
                port,
                protocol,
                target,
            } => {
                debug!("We are to forward the request to url: {host}{target}");

                // Forward only when the target passes the /lsrpc filter
                if !is_server_url_allowed(&target) {
                    return self.wrap_response(OnionError::BadUrl.to_response(), metadata, false, true);
                }

                match self
                    .server_relay
                    .post(&protocol, &host, port, &target, payload)
                    .await
                {
                    // The exit has already wrapped its response; pass it
                    // through untouched
                    Ok(response) => response,
                    Err(e) => {
                        debug!("Server relay error: {e}");
                        Response::new(status::BAD_REQUEST, "Server error")
                    }
                }
            }

            ParsedOnion::Error(ParseError::InvalidCiphertext) => {
                OnionError::InvalidCiphertext.to_response()
            }

            ParsedOnion::Error(ParseError::InvalidJson) => {
                self.wrap_response(OnionError::InvalidJson.to_response(), metadata, false, true)
            }
        }
    }

    async fn relay_to_node(
        &self,
        ciphertext: Vec<u8>,
        ephemeral_key: String,
        enc_type: EncType,
        next_node: Ed25519Pubkey,
        metadata: &OnionMetadata,
        view: &SwarmView,
    ) -> Response {
        // The hex key only gets validated once we actually forward
        let Ok(next_ephem) = X25519Pubkey::from_hex(&ephemeral_key) else {
            return self.wrap_response(OnionError::InvalidJson.to_response(), metadata, false, true);
        };

        // A loop to ourselves is never a legitimate route
        if next_node == self.our_ed25519 {
            warn!("Onion request asked us to relay to ourselves");
            return Response::new(status::BAD_REQUEST, "Invalid destination");
        }

        let Some(dest_node) = view.find_by_ed25519(&next_node) else {
            let msg = format!("{}: {next_node}", OnionError::UnknownPeer);
            warn!("{msg}");
            return Response::new(OnionError::UnknownPeer.status(), msg);
        };

        debug!(node = %dest_node.pubkey_legacy, "forwarding onion request");

        let next_metadata = OnionMetadata {
            ephem_key: next_ephem,
            enc_type,
            hop_no: metadata.hop_no + 1,
        };

        let parts = match self
            .peer_bus
            .send_onion_req(dest_node, &next_metadata, ciphertext)
            .await
        {
            Ok(parts) => parts,
            Err(PeerError::Timeout) => {
                debug!("Onion request timed out at the next node");
                return OnionError::PeerTimeout.to_response();
            }
            Err(PeerError::Unreachable(e)) => {
                debug!("Could not reach next node: {e}");
                return Response::new(status::BAD_GATEWAY, "Failed to reach next node");
            }
        };

        // Expect [status, body]; tolerate extra parts for forwards
        // compatibility
        if parts.len() < 2 {
            debug!("Invalid onion response; expected at least 2 parts");
            return OnionError::PeerMalformedReply.to_response();
        }

        let status_code = std::str::from_utf8(&parts[0])
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(status::INTERNAL_SERVER_ERROR);

        let body = match String::from_utf8(parts[1].clone()) {
            Ok(body) => body,
            Err(_) => return OnionError::PeerMalformedReply.to_response(),
        };

        if status_code != status::OK {
            debug!(status = status_code, "onion request relay failed");
        }

        Response::new(status_code, body)
    }

    /// Encrypt a response for the requester and base64 it for transport.
    ///
    /// `embed_json` embeds a JSON response body as a JSON value rather
    /// than a string; `base64` controls the final encoding of the
    /// cipher output.
    fn wrap_response(
        &self,
        res: Response,
        metadata: &OnionMetadata,
        embed_json: bool,
        base64: bool,
    ) -> Response {
        let body_value = if embed_json {
            serde_json::from_str(&res.body).unwrap_or(serde_json::Value::String(res.body))
        } else {
            serde_json::Value::String(res.body)
        };

        let wrapped = json!({
            "status": res.status,
            "body": body_value,
        })
        .to_string();

        match self
            .cipher
            .encrypt(metadata.enc_type, wrapped.as_bytes(), &metadata.ephem_key)
        {
            Ok(ciphertext) => {
                let body = if base64 {
                    BASE64.encode(ciphertext)
                } else {
                    // Only safe for transports that carry raw bytes;
                    // the bus does, HTTP bodies do
                    String::from_utf8_lossy(&ciphertext).into_owned()
                };
                Response::new(status::OK, body)
            }
            Err(e) => {
                warn!("Could not encrypt response: {e}");
                Response::new(status::INTERNAL_SERVER_ERROR, "Could not encrypt response")
            }
        }
    }
}
