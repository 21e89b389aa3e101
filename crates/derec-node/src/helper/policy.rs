//! Recovery authorization policies
//!
//! A helper consults its policy before returning a share. The default
//! trusts whoever asks once a share is stored: the owner was vetted when
//! the helper approved pairing. A stricter policy can refuse requests
//! unless the helper is currently paired with the owner of that share.

use crate::config::RecoveryPolicyKind;
use crate::helper::store::StoredShare;

/// Decides whether a recovery request may be answered
pub trait RecoveryPolicy: Send + Sync {
    /// Policy name for logs
    fn name(&self) -> &'static str;

    /// Whether to return `share` given the currently paired owner
    fn authorize(&self, share: &StoredShare, paired_owner: Option<&str>) -> bool;
}

/// Honour every request for a stored share
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustEstablishedAtPairing;

impl RecoveryPolicy for TrustEstablishedAtPairing {
    fn name(&self) -> &'static str {
        "trust-at-pairing"
    }

    fn authorize(&self, _share: &StoredShare, _paired_owner: Option<&str>) -> bool {
        true
    }
}

/// Honour requests only while paired with the share's owner
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirePairedOwner;

impl RecoveryPolicy for RequirePairedOwner {
    fn name(&self) -> &'static str {
        "require-paired-owner"
    }

    fn authorize(&self, share: &StoredShare, paired_owner: Option<&str>) -> bool {
        paired_owner == Some(share.owner_name.as_str())
    }
}

/// Build the policy selected in configuration
pub fn policy_for(kind: RecoveryPolicyKind) -> Box<dyn RecoveryPolicy> {
    match kind {
        RecoveryPolicyKind::TrustAtPairing => Box::new(TrustEstablishedAtPairing),
        RecoveryPolicyKind::RequirePairedOwner => Box::new(RequirePairedOwner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derec_core::SecretId;

    fn share_of(owner: &str) -> StoredShare {
        StoredShare {
            secret_id: SecretId::new(vec![1]),
            share_data: vec![0],
            version: 1,
            received_at: 0,
            owner_name: owner.to_string(),
        }
    }

    #[test]
    fn test_trust_at_pairing_always_answers() {
        let policy = TrustEstablishedAtPairing;
        assert!(policy.authorize(&share_of("Alice"), None));
        assert!(policy.authorize(&share_of("Alice"), Some("Mallory")));
    }

    #[test]
    fn test_require_paired_owner() {
        let policy = RequirePairedOwner;
        assert!(policy.authorize(&share_of("Alice"), Some("Alice")));
        assert!(!policy.authorize(&share_of("Alice"), Some("Bob")));
        assert!(!policy.authorize(&share_of("Alice"), None));
    }

    #[test]
    fn test_policy_for_config() {
        assert_eq!(policy_for(RecoveryPolicyKind::default()).name(), "trust-at-pairing");
        assert_eq!(
            policy_for(RecoveryPolicyKind::RequirePairedOwner).name(),
            "require-paired-owner"
        );
    }
}
