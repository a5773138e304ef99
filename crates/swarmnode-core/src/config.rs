//! Node configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::{MAX_MESSAGE_BODY, MAX_REQUEST_BODY, SESSION_TIMEOUT_SECS};

/// Node configuration, loaded from TOML and overridable from the CLI
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Public IPv4 address to advertise
    pub ip: String,

    /// Client-facing HTTPS port
    pub port: u16,

    /// Peer message bus port
    pub lmq_port: u16,

    /// One of trace|debug|info|warn|error|critical
    pub log_level: String,

    /// Where the message store keeps its data
    pub data_dir: PathBuf,

    /// Run against the test network
    pub testnet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 22021,
            lmq_port: 22020,
            log_level: "info".to_string(),
            data_dir: PathBuf::from("/var/lib/swarmnode"),
            testnet: false,
        }
    }
}

impl Config {
    /// Load from a TOML file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Validate before the node starts
    pub fn validate(&self) -> CoreResult<()> {
        if self.port == 0 || self.lmq_port == 0 {
            return Err(CoreError::InvalidConfig(
                "port and lmq_port must be non-zero".to_string(),
            ));
        }
        if self.port == self.lmq_port {
            return Err(CoreError::InvalidConfig(
                "port and lmq_port must differ".to_string(),
            ));
        }
        const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "critical"];
        if !LEVELS.contains(&self.log_level.as_str()) {
            return Err(CoreError::InvalidConfig(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Network limits for the selected network
    pub fn limits(&self) -> NetworkLimits {
        if self.testnet {
            NetworkLimits {
                max_request_body: MAX_REQUEST_BODY,
                max_message_body: 2 * MAX_MESSAGE_BODY,
                session_timeout: Duration::from_secs(SESSION_TIMEOUT_SECS / 2),
            }
        } else {
            NetworkLimits {
                max_request_body: MAX_REQUEST_BODY,
                max_message_body: MAX_MESSAGE_BODY,
                session_timeout: Duration::from_secs(SESSION_TIMEOUT_SECS),
            }
        }
    }
}

/// Size and timing limits that differ between mainnet and testnet
#[derive(Clone, Copy, Debug)]
pub struct NetworkLimits {
    /// Largest accepted request body
    pub max_request_body: usize,
    /// Largest stored message body
    pub max_message_body: usize,
    /// Per-hop deadline for onion requests
    pub session_timeout: Duration,
}
