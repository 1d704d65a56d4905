//! # updateEpoch
//!
//! Nodes of a group roll out configuration changes only at window boundaries.
//! The window is [`UPDATE_EPOCH_WINDOW_SECS`] long and every group gets its own
//! offset ("drift") inside it, so groups of one cluster do not restart in
//! lockstep. The epoch is the end of the current window.

use crate::constants::UPDATE_EPOCH_WINDOW_SECS;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over the concatenation of `parts`
#[must_use]
pub fn fnv1a64(parts: &[&[u8]]) -> u64 {
    parts
        .iter()
        .flat_map(|part| part.iter())
        .fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
        })
}

/// Offset of the group's window boundary, in `[0, window)`
#[must_use]
pub fn epoch_drift(cluster_uuid: &str, node_group: &str) -> i64 {
    let hash = fnv1a64(&[cluster_uuid.as_bytes(), node_group.as_bytes()]);
    // The remainder is below the window size, which fits in i64
    (hash % UPDATE_EPOCH_WINDOW_SECS.unsigned_abs()) as i64
}

/// Unix timestamp at which the window containing `ts` ends
///
/// A timestamp exactly on a boundary belongs to the window it closes.
#[must_use]
pub fn update_epoch(ts: i64, cluster_uuid: &str, node_group: &str) -> i64 {
    let drift = epoch_drift(cluster_uuid, node_group);
    if ts <= drift {
        return drift;
    }
    let window_start = ((ts - drift - 1) / UPDATE_EPOCH_WINDOW_SECS) * UPDATE_EPOCH_WINDOW_SECS;
    window_start + UPDATE_EPOCH_WINDOW_SECS + drift
}
