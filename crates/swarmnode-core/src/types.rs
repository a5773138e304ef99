//! Swarm data model
//!
//! The network partitions users across swarms: fixed-size groups of
//! nodes jointly responsible for a range of user pubkeys. Block updates
//! from the chain poller replace the whole picture at once.

use std::fmt;

use serde::{Deserialize, Serialize};
use swarmnode_crypto::{Ed25519Pubkey, LegacyPubkey, X25519Pubkey};

use crate::error::{CoreError, CoreResult};

/// Identifier of a swarm
pub type SwarmId = u64;

/// Sentinel meaning "not in any swarm / decommissioned".
/// Never exposed as a routing target.
pub const INVALID_SWARM_ID: SwarmId = u64::MAX;

/// Hex length of a client pubkey: one network-prefix byte plus 32 key bytes
pub const USER_PUBKEY_SIZE: usize = 66;

/// A node as seen in a network snapshot.
///
/// Identity is the legacy pubkey; two records for the same node compare
/// equal even when their network coordinates differ.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    /// IPv4 address as a string; "0.0.0.0" when the source had none
    pub ip: String,
    /// HTTPS port
    pub port: u16,
    /// Message bus port
    pub lmq_port: u16,
    pub pubkey_legacy: LegacyPubkey,
    pub pubkey_ed25519: Ed25519Pubkey,
    pub pubkey_x25519: X25519Pubkey,
}

impl NodeRecord {
    /// Whether the record carries usable network coordinates
    pub fn has_address(&self) -> bool {
        !self.ip.is_empty() && self.ip != "0.0.0.0" && self.port != 0 && self.lmq_port != 0
    }

    /// The node's message bus endpoint
    pub fn bus_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.ip, self.lmq_port)
    }
}

impl PartialEq for NodeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.pubkey_legacy == other.pubkey_legacy
    }
}

impl Eq for NodeRecord {}

impl std::hash::Hash for NodeRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.pubkey_legacy.hash(state);
    }
}

/// One swarm and its members, in network order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwarmInfo {
    pub swarm_id: SwarmId,
    pub snodes: Vec<NodeRecord>,
}

/// A full snapshot of swarm composition
pub type AllSwarms = Vec<SwarmInfo>;

/// The atomic unit fed to the tracker by the chain poller
#[derive(Clone, Debug)]
pub struct BlockUpdate {
    pub height: u64,
    pub block_hash: String,
    pub hardfork: u16,
    pub swarms: AllSwarms,
    pub decommissioned: Vec<NodeRecord>,
}

/// Membership changes derived from one block update
#[derive(Clone, Debug, Default)]
pub struct SwarmEvents {
    /// Our swarm after the update; sentinel when not in any swarm
    pub our_swarm_id: SwarmId,
    /// Members of our swarm (including ourselves)
    pub our_swarm_members: Vec<NodeRecord>,
    /// Our old swarm vanished; push everything to its new owners
    pub dissolved: bool,
    /// Nodes that joined our swarm since the last update
    pub new_snodes: Vec<NodeRecord>,
    /// Swarm ids we had never seen before
    pub new_swarms: Vec<SwarmId>,
}

impl SwarmEvents {
    pub fn not_in_any_swarm() -> Self {
        Self {
            our_swarm_id: INVALID_SWARM_ID,
            ..Default::default()
        }
    }
}

/// A client (user) pubkey: a network-prefix byte followed by the key,
/// all hex. The prefix does not take part in swarm mapping.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UserPubkey(String);

impl UserPubkey {
    /// Validate and normalize a client-supplied pubkey string
    pub fn parse(s: &str) -> CoreResult<Self> {
        if s.len() != USER_PUBKEY_SIZE {
            return Err(CoreError::InvalidUserPubkey(format!(
                "expected {} characters, got {}",
                USER_PUBKEY_SIZE,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidUserPubkey("not hex".to_string()));
        }
        Ok(Self(s.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 2 + last 3 characters, for log lines
    pub fn obfuscated(&self) -> String {
        format!("{}...{}", &self.0[..2], &self.0[self.0.len() - 3..])
    }
}

impl fmt::Display for UserPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserPubkey({})", self.obfuscated())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// A deterministic node record for tests; `n` seeds all three keys
    pub fn node(n: u8) -> NodeRecord {
        NodeRecord {
            ip: format!("10.0.0.{n}"),
            port: 22021,
            lmq_port: 22020,
            pubkey_legacy: LegacyPubkey::from_bytes([n; 32]),
            pubkey_ed25519: Ed25519Pubkey::from_bytes([n; 32]),
            pubkey_x25519: X25519Pubkey::from_bytes([n; 32]),
        }
    }

    pub fn user_pubkey(tail: u64) -> UserPubkey {
        // prefix "05" + three zero chunks + one chunk carrying `tail`
        let hex = format!("05{:016x}{}", tail, "0".repeat(48));
        UserPubkey::parse(&hex).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::node;
    use super::*;

    #[test]
    fn test_user_pubkey_validation() {
        let good = format!("05{}", "ab".repeat(32));
        assert!(UserPubkey::parse(&good).is_ok());

        assert!(UserPubkey::parse("0512").is_err());
        let bad = format!("05{}", "zz".repeat(32));
        assert!(UserPubkey::parse(&bad).is_err());
    }

    #[test]
    fn test_user_pubkey_normalizes_case() {
        let upper = format!("05{}", "AB".repeat(32));
        let pk = UserPubkey::parse(&upper).unwrap();
        assert_eq!(pk.as_str(), format!("05{}", "ab".repeat(32)));
    }

    #[test]
    fn test_user_pubkey_obfuscation() {
        let pk = UserPubkey::parse(&format!("05{}", "ab".repeat(32))).unwrap();
        assert_eq!(pk.obfuscated(), "05...bab");
    }

    #[test]
    fn test_node_identity_ignores_coordinates() {
        let mut a = node(1);
        let b = node(1);
        a.ip = "1.2.3.4".to_string();
        a.port = 9999;
        assert_eq!(a, b);
    }

    #[test]
    fn test_has_address() {
        let mut n = node(1);
        assert!(n.has_address());
        n.ip = "0.0.0.0".to_string();
        assert!(!n.has_address());
    }

    #[test]
    fn test_bus_endpoint() {
        let n = node(3);
        assert_eq!(n.bus_endpoint(), "tcp://10.0.0.3:22020");
    }
}
