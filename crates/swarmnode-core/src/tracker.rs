//! Swarm membership tracking
//!
//! The tracker consumes block updates and publishes an immutable
//! [`SwarmView`] through an [`ArcSwap`]: request tasks grab a snapshot
//! at their start and keep it for the request's lifetime, so they see
//! either the old or the new composition in full, never a mix. Updates
//! are serialized by a mutex and swap the view atomically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use swarmnode_crypto::{Ed25519Pubkey, LegacyPubkey, X25519Pubkey};

use crate::mapping::swarm_for_pubkey;
use crate::types::{
    AllSwarms, BlockUpdate, NodeRecord, SwarmEvents, SwarmId, UserPubkey, INVALID_SWARM_ID,
};

/// An immutable snapshot of the network as of one block update
pub struct SwarmView {
    /// Our swarm; sentinel when we are not an active member of any
    pub our_swarm_id: SwarmId,
    /// The other members of our swarm
    pub swarm_peers: Vec<NodeRecord>,
    /// Every active swarm, with coordinates merged across updates
    pub all_swarms: AllSwarms,
    /// Nodes removed from routable swarms but still known
    pub decommissioned: Vec<NodeRecord>,
    /// Height the snapshot was derived from
    pub height: u64,
    /// Hash of that block
    pub block_hash: String,

    nodes_by_legacy: HashMap<LegacyPubkey, NodeRecord>,
    legacy_by_ed25519: HashMap<Ed25519Pubkey, LegacyPubkey>,
    legacy_by_x25519: HashMap<X25519Pubkey, LegacyPubkey>,
}

impl SwarmView {
    /// The view before any block update has arrived
    pub fn empty() -> Self {
        Self {
            our_swarm_id: INVALID_SWARM_ID,
            swarm_peers: Vec::new(),
            all_swarms: Vec::new(),
            decommissioned: Vec::new(),
            height: 0,
            block_hash: String::new(),
            nodes_by_legacy: HashMap::new(),
            legacy_by_ed25519: HashMap::new(),
            legacy_by_x25519: HashMap::new(),
        }
    }

    /// Look a node up by its registration key
    pub fn find_by_legacy(&self, pk: &LegacyPubkey) -> Option<&NodeRecord> {
        self.nodes_by_legacy.get(pk)
    }

    /// Look a node up by its Ed25519 key
    pub fn find_by_ed25519(&self, pk: &Ed25519Pubkey) -> Option<&NodeRecord> {
        self.legacy_by_ed25519
            .get(pk)
            .and_then(|legacy| self.nodes_by_legacy.get(legacy))
    }

    /// Look a node up by its X25519 key
    pub fn find_by_x25519(&self, pk: &X25519Pubkey) -> Option<&NodeRecord> {
        self.legacy_by_x25519
            .get(pk)
            .and_then(|legacy| self.nodes_by_legacy.get(legacy))
    }

    /// Look a node up by its advertised IP, for classifying inbound
    /// bus connections
    pub fn find_by_ip(&self, ip: &str) -> Option<&NodeRecord> {
        self.nodes_by_legacy.values().find(|sn| sn.ip == ip)
    }

    /// Whether this swarm id exists in the snapshot
    pub fn is_existing_swarm(&self, sid: SwarmId) -> bool {
        self.all_swarms.iter().any(|si| si.swarm_id == sid)
    }

    /// Whether messages for `pk` belong on this node
    pub fn is_pubkey_for_us(&self, pk: &UserPubkey) -> bool {
        self.our_swarm_id == swarm_for_pubkey(&self.all_swarms, pk)
    }

    /// The members of the swarm responsible for `pk`, for redirecting
    /// misdirected clients
    pub fn swarm_members_for(&self, pk: &UserPubkey) -> Vec<NodeRecord> {
        let target = swarm_for_pubkey(&self.all_swarms, pk);
        self.all_swarms
            .iter()
            .find(|si| si.swarm_id == target)
            .map(|si| si.snodes.clone())
            .unwrap_or_default()
    }
}

/// Tracks our membership across successive block updates
pub struct SwarmTracker {
    our_address: LegacyPubkey,
    view: ArcSwap<SwarmView>,
    // Serializes apply_block_update; readers never take it
    update_lock: Mutex<()>,
}

impl SwarmTracker {
    pub fn new(our_address: LegacyPubkey) -> Self {
        Self {
            our_address,
            view: ArcSwap::from_pointee(SwarmView::empty()),
            update_lock: Mutex::new(()),
        }
    }

    /// The pubkey we identify ourselves with in snapshots
    pub fn our_address(&self) -> &LegacyPubkey {
        &self.our_address
    }

    /// Grab the current snapshot; valid for as long as the Arc is held
    pub fn view(&self) -> Arc<SwarmView> {
        self.view.load_full()
    }

    /// Whether we are an active member of a swarm
    pub fn is_ready(&self) -> bool {
        self.view.load().our_swarm_id != INVALID_SWARM_ID
    }

    /// Ingest one block update and derive the membership changes.
    ///
    /// The lookup tables are refreshed even when we are not in any
    /// swarm; onion relaying keeps working for a decommissioned node.
    pub fn apply_block_update(&self, update: BlockUpdate) -> SwarmEvents {
        let _guard = self.update_lock.lock();
        let old = self.view.load_full();

        trace!(height = update.height, "applying block update");

        let events = derive_events(&old, &self.our_address, &update.swarms);

        let active = events.our_swarm_id != INVALID_SWARM_ID;
        if !active {
            warn!("We are not currently an active node in any swarm");
        } else if old.our_swarm_id == INVALID_SWARM_ID {
            info!(swarm = events.our_swarm_id, "Started in swarm");
        } else if old.our_swarm_id != events.our_swarm_id {
            info!(swarm = events.our_swarm_id, "Moved into a new swarm");
        }

        if events.dissolved {
            info!("Our old swarm was dissolved");
        }
        for sn in &events.new_snodes {
            info!(node = %sn.pubkey_legacy, "Detected new node in our swarm");
        }
        for swarm in &events.new_swarms {
            info!(swarm, "Detected a new swarm");
        }

        let all_swarms = apply_ips(update.swarms, &old.all_swarms);

        let swarm_peers = if active {
            events
                .our_swarm_members
                .iter()
                .filter(|sn| sn.pubkey_legacy != self.our_address)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        // Lookup maps cover every funded node, decommissioned included
        let mut nodes_by_legacy = HashMap::new();
        for si in &all_swarms {
            for sn in &si.snodes {
                nodes_by_legacy.insert(sn.pubkey_legacy, sn.clone());
            }
        }
        for sn in &update.decommissioned {
            nodes_by_legacy.insert(sn.pubkey_legacy, sn.clone());
        }

        let mut legacy_by_ed25519 = HashMap::new();
        let mut legacy_by_x25519 = HashMap::new();
        for (legacy, sn) in &nodes_by_legacy {
            legacy_by_ed25519.insert(sn.pubkey_ed25519, *legacy);
            legacy_by_x25519.insert(sn.pubkey_x25519, *legacy);
        }

        debug!(
            swarms = all_swarms.len(),
            nodes = nodes_by_legacy.len(),
            "swarm state updated"
        );

        self.view.store(Arc::new(SwarmView {
            our_swarm_id: events.our_swarm_id,
            swarm_peers,
            all_swarms,
            decommissioned: update.decommissioned,
            height: update.height,
            block_hash: update.block_hash,
            nodes_by_legacy,
            legacy_by_ed25519,
            legacy_by_x25519,
        }));

        events
    }
}

/// Compare the incoming swarm composition with the previous view
fn derive_events(
    old: &SwarmView,
    our_address: &LegacyPubkey,
    swarms: &AllSwarms,
) -> SwarmEvents {
    let our_swarm = swarms
        .iter()
        .find(|si| si.snodes.iter().any(|sn| sn.pubkey_legacy == *our_address));

    let Some(our_swarm) = our_swarm else {
        // We are not in any swarm, nothing to derive
        return SwarmEvents::not_in_any_swarm();
    };

    let mut events = SwarmEvents {
        our_swarm_id: our_swarm.swarm_id,
        our_swarm_members: our_swarm.snodes.clone(),
        ..Default::default()
    };

    if old.our_swarm_id == INVALID_SWARM_ID {
        // Only just started in a swarm, no churn to report
        return events;
    }

    if old.our_swarm_id != events.our_swarm_id {
        // Got moved; if the old swarm is gone entirely we must push our
        // data to whoever owns its range now
        if !swarms.iter().any(|si| si.swarm_id == old.our_swarm_id) {
            events.dissolved = true;
        }
        return events;
    }

    // Same swarm: spot joiners
    for sn in &our_swarm.snodes {
        if sn.pubkey_legacy != *our_address && !old.swarm_peers.contains(sn) {
            events.new_snodes.push(sn.clone());
        }
    }

    // And brand new swarms
    let known: HashSet<SwarmId> = old.all_swarms.iter().map(|si| si.swarm_id).collect();
    for si in swarms {
        if !known.contains(&si.swarm_id) {
            events.new_swarms.push(si.swarm_id);
        }
    }

    events
}

/// Merge network coordinates across snapshots.
///
/// The incoming snapshot decides the composition; for nodes we already
/// knew, a default coordinate ("0.0.0.0", port 0) in the incoming data
/// never erases a known-good retained value. Chain-only updates arrive
/// without coordinates and must not blind us.
pub fn apply_ips(incoming: AllSwarms, retained: &AllSwarms) -> AllSwarms {
    let mut retained_map: HashMap<LegacyPubkey, &NodeRecord> = HashMap::new();
    for si in retained {
        for sn in &si.snodes {
            retained_map.insert(sn.pubkey_legacy, sn);
        }
    }

    let mut result = incoming;
    let mut updates = 0;
    for si in &mut result {
        for sn in &mut si.snodes {
            let Some(old) = retained_map.get(&sn.pubkey_legacy) else {
                continue;
            };
            if (sn.ip.is_empty() || sn.ip == "0.0.0.0") && old.has_ip() {
                sn.ip = old.ip.clone();
                updates += 1;
            }
            if sn.port == 0 && old.port != 0 {
                sn.port = old.port;
                updates += 1;
            }
            if sn.lmq_port == 0 && old.lmq_port != 0 {
                sn.lmq_port = old.lmq_port;
                updates += 1;
            }
        }
    }

    if updates > 0 {
        debug!(updates, "kept known coordinates over defaults");
    }
    result
}

impl NodeRecord {
    fn has_ip(&self) -> bool {
        !self.ip.is_empty() && self.ip != "0.0.0.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_util::{node, user_pubkey};
    use crate::types::SwarmInfo;

    fn update(height: u64, swarms: AllSwarms) -> BlockUpdate {
        BlockUpdate {
            height,
            block_hash: format!("hash-{height}"),
            hardfork: 18,
            swarms,
            decommissioned: Vec::new(),
        }
    }

    fn swarm(id: SwarmId, members: &[u8]) -> SwarmInfo {
        SwarmInfo {
            swarm_id: id,
            snodes: members.iter().map(|&n| node(n)).collect(),
        }
    }

    #[test]
    fn test_startup_emits_no_churn() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        let events = tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2, 3])]));

        assert_eq!(events.our_swarm_id, 10);
        assert_eq!(events.our_swarm_members.len(), 3);
        assert!(!events.dissolved);
        assert!(events.new_snodes.is_empty());
        assert!(events.new_swarms.is_empty());
        assert!(tracker.is_ready());
    }

    #[test]
    fn test_not_in_any_swarm() {
        let tracker = SwarmTracker::new(node(9).pubkey_legacy);
        let events = tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2])]));

        assert_eq!(events.our_swarm_id, INVALID_SWARM_ID);
        assert!(!tracker.is_ready());
        // Lookup tables are still refreshed
        let view = tracker.view();
        assert!(view.find_by_legacy(&node(1).pubkey_legacy).is_some());
    }

    #[test]
    fn test_new_snode_detected() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2])]));
        let events = tracker.apply_block_update(update(2, vec![swarm(10, &[1, 2, 3])]));

        assert_eq!(events.new_snodes, vec![node(3)]);
        assert!(!events.dissolved);
    }

    #[test]
    fn test_new_swarm_detected() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2])]));
        let events =
            tracker.apply_block_update(update(2, vec![swarm(10, &[1, 2]), swarm(20, &[4, 5])]));

        assert_eq!(events.new_swarms, vec![20]);
    }

    #[test]
    fn test_dissolution() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2]), swarm(20, &[4, 5])]));

        // Swarm 10 vanishes; we land in 20
        let events =
            tracker.apply_block_update(update(2, vec![swarm(20, &[1, 4, 5])]));
        assert_eq!(events.our_swarm_id, 20);
        assert!(events.dissolved);
    }

    #[test]
    fn test_move_without_dissolution() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2]), swarm(20, &[4, 5])]));

        // We move to 20 but 10 lives on
        let events = tracker
            .apply_block_update(update(2, vec![swarm(10, &[2, 3]), swarm(20, &[1, 4, 5])]));
        assert_eq!(events.our_swarm_id, 20);
        assert!(!events.dissolved);
    }

    #[test]
    fn test_apply_ips_keeps_known_coordinates() {
        let mut incoming = swarm(10, &[1, 2]);
        incoming.snodes[0].ip = "0.0.0.0".to_string();
        incoming.snodes[0].port = 0;
        incoming.snodes[0].lmq_port = 0;

        let retained = vec![swarm(10, &[1, 2])];
        let merged = apply_ips(vec![incoming], &retained);

        assert_eq!(merged[0].snodes[0].ip, "10.0.0.1");
        assert_eq!(merged[0].snodes[0].port, 22021);
        assert_eq!(merged[0].snodes[0].lmq_port, 22020);
    }

    #[test]
    fn test_apply_ips_prefers_fresh_coordinates() {
        let mut incoming = swarm(10, &[1]);
        incoming.snodes[0].ip = "203.0.113.7".to_string();
        incoming.snodes[0].port = 4443;

        let retained = vec![swarm(10, &[1])];
        let merged = apply_ips(vec![incoming], &retained);

        assert_eq!(merged[0].snodes[0].ip, "203.0.113.7");
        assert_eq!(merged[0].snodes[0].port, 4443);
    }

    #[test]
    fn test_apply_ips_survives_through_tracker() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2])]));

        // Chain-only update: no coordinates at all
        let mut bare = swarm(10, &[1, 2]);
        for sn in &mut bare.snodes {
            sn.ip = "0.0.0.0".to_string();
            sn.port = 0;
            sn.lmq_port = 0;
        }
        tracker.apply_block_update(update(2, vec![bare]));

        let view = tracker.view();
        let peer = view.find_by_legacy(&node(2).pubkey_legacy).unwrap();
        assert_eq!(peer.ip, "10.0.0.2");
        assert!(peer.has_address());
    }

    #[test]
    fn test_cross_key_lookup() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2])]));

        let view = tracker.view();
        let by_ed = view.find_by_ed25519(&node(2).pubkey_ed25519).unwrap();
        let by_x = view.find_by_x25519(&node(2).pubkey_x25519).unwrap();
        assert_eq!(by_ed, by_x);
        assert_eq!(by_ed.pubkey_legacy, node(2).pubkey_legacy);
    }

    #[test]
    fn test_decommissioned_nodes_resolvable() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        let mut bu = update(1, vec![swarm(10, &[1, 2])]);
        bu.decommissioned = vec![node(7)];
        tracker.apply_block_update(bu);

        let view = tracker.view();
        assert!(view.find_by_legacy(&node(7).pubkey_legacy).is_some());
        // But a decommissioned node is in no swarm
        assert!(!view.is_existing_swarm(INVALID_SWARM_ID));
    }

    #[test]
    fn test_is_pubkey_for_us_consistent_with_mapping() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(
            1,
            vec![swarm(0x1000, &[1, 2]), swarm(0xF000_0000_0000_0000, &[4, 5])],
        ));

        let view = tracker.view();
        let pk = user_pubkey(0x1234);
        let mapped = swarm_for_pubkey(&view.all_swarms, &pk);
        assert_eq!(view.is_pubkey_for_us(&pk), mapped == view.our_swarm_id);

        // And the swarm handed to misdirected clients is the mapped one
        let members = view.swarm_members_for(&pk);
        assert!(!members.is_empty());
    }

    #[test]
    fn test_readers_see_whole_snapshots() {
        let tracker = SwarmTracker::new(node(1).pubkey_legacy);
        tracker.apply_block_update(update(1, vec![swarm(10, &[1, 2])]));

        let before = tracker.view();
        tracker.apply_block_update(update(2, vec![swarm(10, &[1, 2, 3])]));
        let after = tracker.view();

        // The old handle still shows the old composition
        assert_eq!(before.swarm_peers.len(), 1);
        assert_eq!(after.swarm_peers.len(), 2);
        assert_eq!(before.height, 1);
        assert_eq!(after.height, 2);
    }
}
