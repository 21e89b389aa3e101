//! Owner-side registry of helpers

use std::collections::BTreeMap;

use derec_core::{ChannelId, HelperId, Timestamp};
use serde::Serialize;

/// Outcome of the latest verification round for a helper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    #[default]
    Unset,
    Pending,
    Valid,
    Invalid,
    NoShare,
}

/// What the owner knows about one helper
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedHelper {
    pub id: HelperId,
    pub channel_id: ChannelId,
    pub transport_uri: String,
    pub paired: bool,
    pub has_share: bool,
    pub last_seen: Option<Timestamp>,
    pub last_verified: Option<Timestamp>,
    pub verification_status: VerificationStatus,
}

impl PairedHelper {
    fn new(id: HelperId) -> Self {
        Self {
            id,
            channel_id: id.channel_id(),
            transport_uri: id.transport_uri(),
            paired: false,
            has_share: false,
            last_seen: None,
            last_verified: None,
            verification_status: VerificationStatus::Unset,
        }
    }
}

/// Keyed, append-only helper registry
///
/// Entries are never removed. Share and verification state is only ever
/// set on paired entries, so an unpaired helper always reads as
/// `has_share = false` with an unset verification status.
#[derive(Debug, Clone, Default)]
pub struct HelperRegistry {
    helpers: BTreeMap<HelperId, PairedHelper>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: HelperId) -> Option<&PairedHelper> {
        self.helpers.get(&id)
    }

    /// Every known helper in id order
    pub fn all(&self) -> impl Iterator<Item = &PairedHelper> {
        self.helpers.values()
    }

    /// Paired helpers in id order
    pub fn paired(&self) -> impl Iterator<Item = &PairedHelper> {
        self.helpers.values().filter(|h| h.paired)
    }

    pub fn paired_count(&self) -> usize {
        self.paired().count()
    }

    pub fn is_paired(&self, id: HelperId) -> bool {
        self.helpers.get(&id).map_or(false, |h| h.paired)
    }

    /// Paired helpers currently holding a share
    pub fn with_share(&self) -> impl Iterator<Item = &PairedHelper> {
        self.paired().filter(|h| h.has_share)
    }

    pub fn any_has_share(&self) -> bool {
        self.with_share().next().is_some()
    }

    /// Record an announcement, creating the entry if needed
    ///
    /// `last_seen` is seeded only when it has never been set; afterwards it
    /// moves with protocol responses.
    pub fn announced(&mut self, id: HelperId, now: Timestamp) {
        let helper = self.helpers.entry(id).or_insert_with(|| PairedHelper::new(id));
        if helper.last_seen.is_none() {
            helper.last_seen = Some(now);
        }
    }

    /// Refresh `last_seen` from a protocol response
    pub fn responded(&mut self, id: HelperId, now: Timestamp) {
        if let Some(helper) = self.helpers.get_mut(&id) {
            helper.last_seen = Some(helper.last_seen.map_or(now, |seen| seen.max(now)));
        }
    }

    /// Mark a helper paired; returns `true` if it was not paired before
    pub fn mark_paired(&mut self, id: HelperId, now: Timestamp) -> bool {
        let helper = self.helpers.entry(id).or_insert_with(|| PairedHelper::new(id));
        helper.last_seen = Some(helper.last_seen.map_or(now, |seen| seen.max(now)));
        let newly = !helper.paired;
        helper.paired = true;
        newly
    }

    /// Set the share flag on a paired helper
    ///
    /// Returns `false` (and changes nothing) when the helper is not paired.
    pub fn set_has_share(&mut self, id: HelperId, has_share: bool) -> bool {
        match self.helpers.get_mut(&id) {
            Some(helper) if helper.paired => {
                helper.has_share = has_share;
                true
            }
            _ => false,
        }
    }

    /// Set the verification status on a paired helper
    pub fn set_verification(
        &mut self,
        id: HelperId,
        status: VerificationStatus,
        now: Timestamp,
    ) -> bool {
        match self.helpers.get_mut(&id) {
            Some(helper) if helper.paired => {
                helper.verification_status = status;
                if status == VerificationStatus::Valid {
                    helper.last_verified = Some(now);
                }
                if status == VerificationStatus::NoShare {
                    helper.has_share = false;
                }
                true
            }
            _ => false,
        }
    }

    /// Forget share and verification state on every paired helper
    pub fn reset_shares(&mut self) {
        for helper in self.helpers.values_mut().filter(|h| h.paired) {
            helper.has_share = false;
            helper.verification_status = VerificationStatus::Unset;
        }
    }

    /// Copy of every entry, in id order
    pub fn snapshot(&self) -> Vec<PairedHelper> {
        self.helpers.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> HelperId {
        HelperId::new(n).unwrap()
    }

    #[test]
    fn test_announce_seeds_last_seen_once() {
        let mut registry = HelperRegistry::new();
        registry.announced(h(1), 100);
        registry.announced(h(1), 900);
        assert_eq!(registry.get(h(1)).unwrap().last_seen, Some(100));
        assert!(!registry.get(h(1)).unwrap().paired);
    }

    #[test]
    fn test_repeated_pairing_keeps_one_entry() {
        let mut registry = HelperRegistry::new();
        assert!(registry.mark_paired(h(2), 10));
        assert!(!registry.mark_paired(h(2), 20));
        assert_eq!(registry.all().count(), 1);
        assert_eq!(registry.paired_count(), 1);
    }

    #[test]
    fn test_unpaired_helpers_never_hold_shares() {
        let mut registry = HelperRegistry::new();
        registry.announced(h(3), 0);
        assert!(!registry.set_has_share(h(3), true));
        assert!(!registry.set_verification(h(3), VerificationStatus::Valid, 5));

        let helper = registry.get(h(3)).unwrap();
        assert!(!helper.has_share);
        assert_eq!(helper.verification_status, VerificationStatus::Unset);
    }

    #[test]
    fn test_no_share_clears_flag() {
        let mut registry = HelperRegistry::new();
        registry.mark_paired(h(1), 0);
        registry.set_has_share(h(1), true);
        registry.set_verification(h(1), VerificationStatus::NoShare, 10);

        let helper = registry.get(h(1)).unwrap();
        assert!(!helper.has_share);
        assert_eq!(helper.verification_status, VerificationStatus::NoShare);
        assert_eq!(helper.last_verified, None);
    }

    #[test]
    fn test_reset_shares() {
        let mut registry = HelperRegistry::new();
        for n in 1..=3 {
            registry.mark_paired(h(n), 0);
            registry.set_has_share(h(n), true);
            registry.set_verification(h(n), VerificationStatus::Valid, 1);
        }
        registry.reset_shares();
        assert!(!registry.any_has_share());
        assert!(registry
            .all()
            .all(|h| h.verification_status == VerificationStatus::Unset));
    }
}
