//! Helper-side records: stored shares, known owners, pending pairings

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use derec_core::{ChannelId, SecretId, ShareInfo, Timestamp};
use serde::Serialize;

/// Owner name recorded for shares received while unpaired
pub const UNKNOWN_OWNER: &str = "unknown";

/// A share held on behalf of an owner
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredShare {
    pub secret_id: SecretId,
    #[serde(skip)]
    pub share_data: Vec<u8>,
    pub version: u32,
    pub received_at: Timestamp,
    pub owner_name: String,
}

impl StoredShare {
    /// Inventory entry reported in LIST_SHARES_RESPONSE
    pub fn info(&self) -> ShareInfo {
        ShareInfo {
            secret_id: self.secret_id.clone(),
            version: self.version,
            received_at: self.received_at,
            owner_name: self.owner_name.clone(),
        }
    }
}

impl fmt::Debug for StoredShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredShare")
            .field("secret_id", &self.secret_id)
            .field("share_data", &format_args!("<{} bytes>", self.share_data.len()))
            .field("version", &self.version)
            .field("received_at", &self.received_at)
            .field("owner_name", &self.owner_name)
            .finish()
    }
}

/// An owner this helper has paired with at some point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownOwner {
    pub name: String,
    pub secret_ids: BTreeSet<SecretId>,
    pub first_paired_at: Timestamp,
    pub last_seen_at: Timestamp,
}

/// A pairing request awaiting the helper's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPairingRequest {
    pub channel_id: ChannelId,
    pub owner_name: String,
    pub is_recovery_mode: bool,
    #[serde(skip)]
    pub contact_message: Vec<u8>,
    pub requested_at: Timestamp,
    /// Secrets already held for this owner when the request arrived
    pub existing_secret_count: u32,
}

/// Shares keyed by secret id, last write wins
#[derive(Debug, Clone, Default)]
pub struct ShareStore {
    shares: BTreeMap<SecretId, StoredShare>,
}

impl ShareStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the share for its secret id
    ///
    /// Arrival order decides; an older version overwrites a newer one.
    /// Returns the version that was replaced, if any.
    pub fn upsert(&mut self, share: StoredShare) -> Option<u32> {
        self.shares
            .insert(share.secret_id.clone(), share)
            .map(|previous| previous.version)
    }

    pub fn get(&self, secret_id: &SecretId) -> Option<&StoredShare> {
        self.shares.get(secret_id)
    }

    /// Drop a share, returning it
    pub fn remove(&mut self, secret_id: &SecretId) -> Option<StoredShare> {
        self.shares.remove(secret_id)
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Inventory for `owner`, or for everything when `owner` is `None`
    pub fn inventory(&self, owner: Option<&str>) -> Vec<ShareInfo> {
        self.shares
            .values()
            .filter(|s| owner.map_or(true, |name| s.owner_name == name))
            .map(StoredShare::info)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(id: u8, version: u32, owner: &str) -> StoredShare {
        StoredShare {
            secret_id: SecretId::new(vec![id]),
            share_data: vec![version as u8; 4],
            version,
            received_at: version as u64 * 10,
            owner_name: owner.to_string(),
        }
    }

    #[test]
    fn test_last_write_wins_regardless_of_version() {
        let mut store = ShareStore::new();
        assert_eq!(store.upsert(share(1, 2, "Alice")), None);
        assert_eq!(store.upsert(share(1, 1, "Alice")), Some(2));

        let stored = store.get(&SecretId::new(vec![1])).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_inventory_filters_by_owner() {
        let mut store = ShareStore::new();
        store.upsert(share(1, 1, "Alice"));
        store.upsert(share(2, 1, "Bob"));
        store.upsert(share(3, 1, UNKNOWN_OWNER));

        let alice = store.inventory(Some("Alice"));
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].secret_id, SecretId::new(vec![1]));
        assert_eq!(store.inventory(None).len(), 3);
    }

    #[test]
    fn test_debug_hides_share_bytes() {
        let rendered = format!("{:?}", share(1, 7, "Alice"));
        assert!(rendered.contains("<4 bytes>"));
    }
}
