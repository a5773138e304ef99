//! Swarmnode Core Protocol
//!
//! Implements the membership side of the storage network:
//! - Swarm data model (nodes, swarms, block updates)
//! - Deterministic pubkey-to-swarm mapping
//! - Membership tracking across block updates
//! - Request rate limiting
//! - Node configuration

pub mod config;
pub mod error;
pub mod limiter;
pub mod mapping;
pub mod tracker;
pub mod types;

pub use config::{Config, NetworkLimits};
pub use error::{CoreError, CoreResult};
pub use limiter::RateLimiter;
pub use mapping::swarm_for_pubkey;
pub use tracker::{SwarmTracker, SwarmView};
pub use types::{
    AllSwarms, BlockUpdate, NodeRecord, SwarmEvents, SwarmId, SwarmInfo, UserPubkey,
    INVALID_SWARM_ID,
};

/// Maximum accepted request body (peer bus and client endpoints)
pub const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

/// Maximum stored message body on mainnet
pub const MAX_MESSAGE_BODY: usize = 100 * 1024;

/// Per-hop session timeout in seconds
pub const SESSION_TIMEOUT_SECS: u64 = 60;
