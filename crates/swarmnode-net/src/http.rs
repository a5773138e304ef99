//! Outbound HTTP(S) relay
//!
//! Executes the relay-to-server leg of an onion request: POST the outer
//! plaintext to `protocol://host:port/target` and hand the body back.
//! The exit server has already encrypted its answer for the client, so
//! the body passes through untouched.

use async_trait::async_trait;
use tracing::debug;

use swarmnode_onion::{Response, ServerRelay};

use crate::error::NetResult;

pub struct HttpRelay {
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new(timeout: std::time::Duration) -> NetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ServerRelay for HttpRelay {
    async fn post(
        &self,
        protocol: &str,
        host: &str,
        port: u16,
        target: &str,
        payload: Vec<u8>,
    ) -> Result<Response, String> {
        let url = format!("{protocol}://{host}:{port}{target}");
        debug!(%url, "forwarding onion request to server");

        let res = self
            .client
            .post(&url)
            .body(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = res.status().as_u16();
        let body = res.text().await.map_err(|e| e.to_string())?;

        if status != 200 {
            debug!(status, "server relay returned non-OK status");
        }

        // The requester only sees the body; transport status stays OK,
        // matching what exits have always done
        Ok(Response::ok(body))
    }
}
