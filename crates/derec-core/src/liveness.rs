//! Online/offline tracking from "last seen" observations
//!
//! A peer becomes online the moment it is observed and goes offline once
//! it has been silent for longer than the threshold. Offline transitions
//! are only reported by [`LivenessTracker::sweep`], which callers run on
//! their liveness-check interval.

use std::collections::BTreeMap;

use crate::types::Timestamp;

/// Liveness state of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerLiveness {
    /// Last time the peer was observed
    pub last_seen: Timestamp,

    /// Whether the peer is currently considered online
    pub online: bool,
}

/// Tracks liveness for a set of peers keyed by `K`
#[derive(Debug, Clone)]
pub struct LivenessTracker<K> {
    offline_threshold_ms: u64,
    peers: BTreeMap<K, PeerLiveness>,
}

impl<K: Ord + Copy> LivenessTracker<K> {
    /// Create a tracker with the given silence threshold
    pub fn new(offline_threshold_ms: u64) -> Self {
        Self {
            offline_threshold_ms,
            peers: BTreeMap::new(),
        }
    }

    /// Record that `peer` was seen at `now`
    ///
    /// Returns `true` when this observation brings the peer online.
    pub fn observe(&mut self, peer: K, now: Timestamp) -> bool {
        let entry = self.peers.entry(peer).or_insert(PeerLiveness {
            last_seen: now,
            online: false,
        });
        let came_online = !entry.online;
        entry.online = true;
        entry.last_seen = entry.last_seen.max(now);
        came_online
    }

    /// Mark silent peers offline, returning the ones that just went offline
    pub fn sweep(&mut self, now: Timestamp) -> Vec<K> {
        let threshold = self.offline_threshold_ms;
        self.peers
            .iter_mut()
            .filter(|(_, state)| state.online && now.saturating_sub(state.last_seen) > threshold)
            .map(|(peer, state)| {
                state.online = false;
                *peer
            })
            .collect()
    }

    /// Whether `peer` is currently online
    pub fn is_online(&self, peer: K) -> bool {
        self.peers.get(&peer).map(|s| s.online).unwrap_or(false)
    }

    /// Last observation time for `peer`
    pub fn last_seen(&self, peer: K) -> Option<Timestamp> {
        self.peers.get(&peer).map(|s| s.last_seen)
    }

    /// Peers currently online, in key order
    pub fn online_peers(&self) -> Vec<K> {
        self.peers
            .iter()
            .filter(|(_, s)| s.online)
            .map(|(peer, _)| *peer)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_brings_online_once() {
        let mut tracker = LivenessTracker::new(15_000);
        assert!(tracker.observe(1u8, 1_000));
        assert!(!tracker.observe(1u8, 2_000));
        assert!(tracker.is_online(1));
        assert_eq!(tracker.last_seen(1), Some(2_000));
        assert!(!tracker.is_online(2));
    }

    #[test]
    fn test_offline_strictly_after_threshold() {
        let mut tracker = LivenessTracker::new(15_000);
        tracker.observe(1u8, 0);

        assert!(tracker.sweep(15_000).is_empty());
        assert!(tracker.is_online(1));

        assert_eq!(tracker.sweep(15_001), vec![1]);
        assert!(!tracker.is_online(1));

        // Already offline: not reported again
        assert!(tracker.sweep(30_000).is_empty());

        assert!(tracker.observe(1u8, 30_000));
        assert_eq!(tracker.online_peers(), vec![1]);
    }

    #[test]
    fn test_stale_observation_does_not_rewind() {
        let mut tracker = LivenessTracker::new(100);
        tracker.observe(7u8, 500);
        tracker.observe(7u8, 200);
        assert_eq!(tracker.last_seen(7), Some(500));
    }
}
