//! Pubkey-to-swarm mapping
//!
//! A user pubkey maps to the swarm whose id is nearest on a ring of
//! width `u64::MAX - 1`; the sentinel id sits outside the ring. The
//! mapping depends only on the pubkey and the set of swarm ids, so any
//! node reaches the same answer from the same snapshot.

use crate::types::{SwarmId, SwarmInfo, UserPubkey, INVALID_SWARM_ID};

/// Largest id on the ring; `INVALID_SWARM_ID` is reserved
const MAX_RING_ID: u64 = INVALID_SWARM_ID - 1;

/// Collapse a user pubkey to its position on the ring.
///
/// XOR of every 16-hex-digit chunk after the 2-character network
/// prefix, which does not take part in the mapping.
pub fn ring_position(pk: &UserPubkey) -> u64 {
    let hex = &pk.as_str()[2..];
    let mut res = 0u64;
    for chunk in hex.as_bytes().chunks(16) {
        // Guaranteed hex by UserPubkey::parse; a short trailing chunk
        // contributes its own value.
        let chunk = std::str::from_utf8(chunk).unwrap_or("");
        res ^= u64::from_str_radix(chunk, 16).unwrap_or(0);
    }
    res
}

/// Find the swarm responsible for `pk`.
///
/// Returns `INVALID_SWARM_ID` iff `all_swarms` contains no usable swarm.
/// Sentinel ids in the input are skipped. Ties break to the lowest
/// swarm id, which keeps the result independent of snapshot ordering.
pub fn swarm_for_pubkey(all_swarms: &[SwarmInfo], pk: &UserPubkey) -> SwarmId {
    let res = ring_position(pk);

    let mut cur_best = INVALID_SWARM_ID;
    let mut cur_min = u64::MAX;

    // The snapshot is unordered; track the ring edges in the same scan.
    let mut leftmost = INVALID_SWARM_ID;
    let mut rightmost = 0u64;

    for si in all_swarms {
        if si.swarm_id == INVALID_SWARM_ID {
            // Decommissioned swarms must never be a routing target
            continue;
        }

        let dist = si.swarm_id.abs_diff(res);
        if dist < cur_min || (dist == cur_min && si.swarm_id < cur_best) {
            cur_best = si.swarm_id;
            cur_min = dist;
        }

        if si.swarm_id < leftmost {
            leftmost = si.swarm_id;
        }
        if si.swarm_id > rightmost {
            rightmost = si.swarm_id;
        }
    }

    // Wrap around the ring edge. Adopting a wrap candidate leaves
    // cur_min untouched: every node must agree on this mapping, so the
    // wrap branches mirror the deployed network bit for bit.
    if res > rightmost {
        // res >= leftmost here, so neither subtraction can underflow
        let dist = (MAX_RING_ID - res) + leftmost;
        if dist < cur_min {
            cur_best = leftmost;
        }
    } else if res < leftmost {
        let dist = res + (MAX_RING_ID - rightmost);
        if dist < cur_min {
            cur_best = rightmost;
        }
    }

    cur_best
}
