//! Local RPC endpoint fed by terminal onion requests
//!
//! Handles the membership queries the node can answer from its own
//! state. Storage methods are validated and routed here, but the
//! message store itself is an external subsystem; until one is
//! attached, storage calls answer 503.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, trace};

use swarmnode_core::{NodeRecord, SwarmTracker, UserPubkey, MAX_MESSAGE_BODY};
use swarmnode_onion::http::status;
use swarmnode_onion::{Response, RpcHandler};

pub struct SnodeRpc {
    tracker: Arc<SwarmTracker>,
}

impl SnodeRpc {
    pub fn new(tracker: Arc<SwarmTracker>) -> Self {
        Self { tracker }
    }

    fn snodes_to_json(nodes: &[NodeRecord]) -> Value {
        let snodes: Vec<Value> = nodes
            .iter()
            .map(|sn| {
                json!({
                    "address": sn.pubkey_legacy.snode_address(),
                    "pubkey_legacy": sn.pubkey_legacy.hex(),
                    "pubkey_x25519": sn.pubkey_x25519.hex(),
                    "pubkey_ed25519": sn.pubkey_ed25519.hex(),
                    "port": sn.port.to_string(),
                    "ip": sn.ip,
                })
            })
            .collect();
        json!({ "snodes": snodes })
    }

    fn parse_pubkey(params: &Value) -> Result<UserPubkey, Response> {
        let Some(pk) = params.get("pubKey").and_then(Value::as_str) else {
            return Err(Response::new(status::BAD_REQUEST, "invalid json: no `pubKey` field"));
        };
        UserPubkey::parse(pk)
            .map_err(|e| Response::new(status::BAD_REQUEST, format!("{e}")))
    }

    fn snodes_for_pubkey(&self, params: &Value) -> Response {
        let pk = match Self::parse_pubkey(params) {
            Ok(pk) => pk,
            Err(res) => return res,
        };

        let members = self.tracker.view().swarm_members_for(&pk);
        debug!(count = members.len(), "snodes by pk");
        Response::new(status::OK, Self::snodes_to_json(&members).to_string())
    }

    /// Misdirected client: answer with the right swarm's members
    fn wrong_swarm(&self, pk: &UserPubkey) -> Response {
        trace!(pk = %pk.obfuscated(), "client request to a wrong swarm");
        let members = self.tracker.view().swarm_members_for(pk);
        Response::new(status::MISDIRECTED_REQUEST, Self::snodes_to_json(&members).to_string())
    }

    fn storage_request(&self, params: &Value, is_store: bool) -> Response {
        let pk = match Self::parse_pubkey(params) {
            Ok(pk) => pk,
            Err(res) => return res,
        };

        if is_store {
            let data_len = params
                .get("data")
                .and_then(Value::as_str)
                .map(str::len)
                .unwrap_or(0);
            if data_len > MAX_MESSAGE_BODY {
                return Response::new(
                    status::BAD_REQUEST,
                    format!("Message body exceeds maximum allowed length of {MAX_MESSAGE_BODY}"),
                );
            }
        }

        if !self.tracker.view().is_pubkey_for_us(&pk) {
            return self.wrong_swarm(&pk);
        }

        // Validated and ours, but no store is wired up yet
        Response::new(status::SERVICE_UNAVAILABLE, "Storage backend not attached")
    }
}

#[async_trait]
impl RpcHandler for SnodeRpc {
    async fn handle(&self, body: &[u8]) -> Response {
        let Ok(req) = serde_json::from_slice::<Value>(body) else {
            debug!("bad client request: invalid json");
            return Response::new(status::BAD_REQUEST, "invalid json");
        };

        let Some(method) = req.get("method").and_then(Value::as_str) else {
            return Response::new(status::BAD_REQUEST, "invalid json: no `method` field");
        };
        let Some(params) = req.get("params").filter(|p| p.is_object()) else {
            return Response::new(status::BAD_REQUEST, "invalid json: no `params` field");
        };

        trace!(method, "client request");

        match method {
            "get_snodes_for_pubkey" => self.snodes_for_pubkey(params),
            "store" => self.storage_request(params, true),
            "retrieve" => self.storage_request(params, false),
            other => Response::new(status::BAD_REQUEST, format!("no method {other}")),
        }
    }
}
