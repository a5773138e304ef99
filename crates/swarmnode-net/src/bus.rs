//! Peer-to-peer message bus
//!
//! Nodes talk to each other over a minimal multipart protocol on TCP:
//! a `u32` little-endian part count, then each part as `u32` length
//! followed by its bytes. A request is one frame whose first part names
//! the command; the reply is one frame of `[status_ascii, body]`.
//!
//! The only command the core uses is `onion_req` with required parts
//! `[ephemeral_key_raw, ciphertext]`; optional trailing parts carry the
//! cipher name and hop counter, and receivers tolerate extras for
//! forwards compatibility.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use swarmnode_core::{NodeRecord, RateLimiter, SwarmTracker, MAX_REQUEST_BODY};
use swarmnode_crypto::{EncType, X25519Pubkey};
use swarmnode_onion::{OnionDispatcher, OnionError, OnionMetadata, PeerBus, PeerError, Response};

use crate::error::{NetError, NetResult};

/// Command part for onion forwarding
const CMD_ONION_REQ: &[u8] = b"onion_req";

/// Cap on parts per frame; real frames carry at most a handful
const MAX_PARTS: u32 = 16;

/// How long the server keeps draining in-flight requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Write one multipart frame
async fn write_parts(stream: &mut TcpStream, parts: &[&[u8]]) -> NetResult<()> {
    stream.write_all(&(parts.len() as u32).to_le_bytes()).await?;
    for part in parts {
        stream.write_all(&(part.len() as u32).to_le_bytes()).await?;
        stream.write_all(part).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Read one multipart frame, bounding the total size
async fn read_parts(stream: &mut TcpStream, max_total: usize) -> NetResult<Vec<Vec<u8>>> {
    let mut count_bytes = [0u8; 4];
    stream.read_exact(&mut count_bytes).await?;
    let count = u32::from_le_bytes(count_bytes);
    if count == 0 || count > MAX_PARTS {
        return Err(NetError::Malformed(format!("{count} parts")));
    }

    let mut total = 0usize;
    let mut parts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        total = total.saturating_add(len);
        if total > max_total {
            return Err(NetError::MessageTooLarge(total));
        }

        let mut part = vec![0u8; len];
        stream.read_exact(&mut part).await?;
        parts.push(part);
    }
    Ok(parts)
}

/// Client half: forwards onion payloads to other nodes
pub struct BusClient {
    timeout: Duration,
}

impl BusClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PeerBus for BusClient {
    async fn send_onion_req(
        &self,
        node: &NodeRecord,
        metadata: &OnionMetadata,
        payload: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>, PeerError> {
        if !node.has_address() {
            return Err(PeerError::Unreachable(format!(
                "{} has no known address",
                node.pubkey_legacy
            )));
        }

        let addr = format!("{}:{}", node.ip, node.lmq_port);
        trace!(%addr, "connecting to peer");

        let exchange = async {
            let mut stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| PeerError::Unreachable(e.to_string()))?;

            let enc_type = metadata.enc_type.to_string();
            let hop_no = metadata.hop_no.to_string();
            write_parts(
                &mut stream,
                &[
                    CMD_ONION_REQ,
                    metadata.ephem_key.as_bytes(),
                    &payload,
                    enc_type.as_bytes(),
                    hop_no.as_bytes(),
                ],
            )
            .await
            .map_err(|e| PeerError::Unreachable(e.to_string()))?;

            read_parts(&mut stream, MAX_REQUEST_BODY)
                .await
                .map_err(|e| PeerError::Unreachable(e.to_string()))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout),
        }
    }
}

/// Server half: accepts peer connections and feeds the dispatcher
pub struct BusServer {
    dispatcher: Arc<OnionDispatcher>,
    tracker: Arc<SwarmTracker>,
    limiter: Arc<RateLimiter>,
    max_request_body: usize,
    shutdown: Notify,
}

impl BusServer {
    pub fn new(
        dispatcher: Arc<OnionDispatcher>,
        tracker: Arc<SwarmTracker>,
        limiter: Arc<RateLimiter>,
        max_request_body: usize,
    ) -> Self {
        Self {
            dispatcher,
            tracker,
            limiter,
            max_request_body,
            shutdown: Notify::new(),
        }
    }

    /// Stop accepting connections; `run` drains and returns.
    /// `notify_one` stores a permit, so a stop that lands between two
    /// accept iterations is not lost.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Accept loop. Returns once [`stop`](Self::stop) is called and
    /// in-flight requests have drained (bounded by a grace period).
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> NetResult<()> {
        let local = listener.local_addr()?;
        info!(%local, "message bus listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    let server = self.clone();
                    connections.spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer).await {
                            debug!(%peer, "connection ended: {e}");
                        }
                    });
                }
                // Reap finished connection tasks as we go
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!("message bus shutting down, draining connections");
        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("drain grace period expired, aborting remaining connections");
            connections.abort_all();
        }
        Ok(())
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> NetResult<()> {
        let parts = match read_parts(&mut stream, self.max_request_body).await {
            Ok(parts) => parts,
            Err(NetError::MessageTooLarge(size)) => {
                debug!(%peer, size, "oversize request");
                // Best effort: answer 413, then drop the connection
                let res = OnionError::PayloadTooLarge.to_response();
                let status = res.status.to_string();
                let _ = write_parts(&mut stream, &[status.as_bytes(), res.body.as_bytes()]).await;
                return Err(NetError::MessageTooLarge(size));
            }
            Err(e) => return Err(e),
        };

        let response = self.process_frame(&parts, peer).await;
        let status = response.status.to_string();
        write_parts(&mut stream, &[status.as_bytes(), response.body.as_bytes()]).await
    }

    async fn process_frame(&self, parts: &[Vec<u8>], peer: SocketAddr) -> Response {
        if self.rate_limited(peer) {
            return OnionError::RateLimited.to_response();
        }

        if parts.len() < 3 || parts[0] != CMD_ONION_REQ {
            debug!(%peer, "unknown bus command");
            return Response::new(400, "Unknown command");
        }

        let Ok(ephem_key) = X25519Pubkey::try_from_slice(&parts[1]) else {
            return Response::new(400, "Invalid ephemeral key");
        };

        // Optional trailing parts: cipher name, hop counter
        let enc_type = parts
            .get(3)
            .and_then(|p| std::str::from_utf8(p).ok())
            .and_then(|s| EncType::parse(s).ok())
            .unwrap_or_default();
        let hop_no = parts
            .get(4)
            .and_then(|p| std::str::from_utf8(p).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let metadata = OnionMetadata {
            ephem_key,
            enc_type,
            hop_no,
        };

        self.dispatcher.process_onion_req(&parts[2], metadata).await
    }

    /// Known nodes burn tokens from their identity bucket, everyone
    /// else from the per-address client bucket
    fn rate_limited(&self, peer: SocketAddr) -> bool {
        let view = self.tracker.view();
        let ip = peer.ip().to_string();
        match view.find_by_ip(&ip) {
            Some(node) => self.limiter.should_rate_limit(&node.pubkey_legacy),
            None => self.limiter.should_rate_limit_client(peer.ip()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let parts = read_parts(&mut stream, MAX_REQUEST_BODY).await.unwrap();
            let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
            write_parts(&mut stream, &refs).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_parts(&mut stream, &[b"onion_req", &[0xaa; 32], b"payload"])
            .await
            .unwrap();
        let echoed = read_parts(&mut stream, MAX_REQUEST_BODY).await.unwrap();

        assert_eq!(echoed.len(), 3);
        assert_eq!(echoed[0], b"onion_req");
        assert_eq!(echoed[1], vec![0xaa; 32]);
        assert_eq!(echoed[2], b"payload");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_parts(&mut stream, 64).await
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_parts(&mut stream, &[&[0u8; 1024]]).await.unwrap();

        assert!(matches!(
            server.await.unwrap(),
            Err(NetError::MessageTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_parts_is_malformed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_parts(&mut stream, MAX_REQUEST_BODY).await
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&0u32.to_le_bytes()).await.unwrap();
        stream.flush().await.unwrap();

        assert!(matches!(server.await.unwrap(), Err(NetError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_client_unreachable_without_address() {
        let client = BusClient::new(Duration::from_millis(100));
        let node = NodeRecord {
            ip: "0.0.0.0".to_string(),
            port: 0,
            lmq_port: 0,
            pubkey_legacy: swarmnode_crypto::LegacyPubkey::from_bytes([1; 32]),
            pubkey_ed25519: swarmnode_crypto::Ed25519Pubkey::from_bytes([1; 32]),
            pubkey_x25519: X25519Pubkey::from_bytes([1; 32]),
        };
        let metadata = OnionMetadata::new(X25519Pubkey::from_bytes([2; 32]));

        let res = client.send_onion_req(&node, &metadata, b"x".to_vec()).await;
        assert!(matches!(res, Err(PeerError::Unreachable(_))));
    }
}
