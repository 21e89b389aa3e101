//! Helper state machine
//!
//! One instance per helper slot. A helper never accepts pairing on its
//! own: requests wait in a pending list until the operator approves or
//! denies them. Shares are stored last-write-wins and acknowledged once,
//! after a short delay.

pub mod policy;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use derec_core::{
    ChannelId, Envelope, HelperId, LivenessTracker, Message, ParticipantId, Role, SecretId,
    ShareInfo, Timestamp, VerificationFailure,
};
use derec_engine::SecretSharingEngine;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::runtime::Participant;

pub use policy::{policy_for, RecoveryPolicy, RequirePairedOwner, TrustEstablishedAtPairing};
pub use store::{KnownOwner, PendingPairingRequest, ShareStore, StoredShare, UNKNOWN_OWNER};

/// Read-only view of a helper's state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperSnapshot {
    pub id: HelperId,
    pub owner_connected: bool,
    pub owner_last_seen: Option<Timestamp>,
    pub paired_owner: Option<String>,
    pub shares: Vec<ShareInfo>,
    pub known_owners: Vec<KnownOwner>,
    pub pending_requests: Vec<PendingPairingRequest>,
}

/// An envelope held back until `due`
#[derive(Debug, Clone)]
struct Scheduled {
    due: Timestamp,
    envelope: Envelope,
}

/// The helper role
pub struct Helper {
    id: HelperId,
    config: NodeConfig,
    engine: Arc<dyn SecretSharingEngine>,
    policy: Box<dyn RecoveryPolicy>,
    shares: ShareStore,
    known_owners: BTreeMap<String, KnownOwner>,
    pending: BTreeMap<String, PendingPairingRequest>,
    paired_owner: Option<String>,
    owner_liveness: LivenessTracker<ParticipantId>,
    scheduled: Vec<Scheduled>,
    next_liveness: Option<Timestamp>,
}

impl Helper {
    /// Create a helper for slot `id`, using the policy named in `config`
    pub fn new(id: HelperId, config: NodeConfig, engine: Arc<dyn SecretSharingEngine>) -> Self {
        let policy = policy_for(config.recovery_policy);
        Self::with_policy(id, config, engine, policy)
    }

    /// Create a helper with an explicit recovery policy
    pub fn with_policy(
        id: HelperId,
        config: NodeConfig,
        engine: Arc<dyn SecretSharingEngine>,
        policy: Box<dyn RecoveryPolicy>,
    ) -> Self {
        let owner_liveness = LivenessTracker::new(config.offline_threshold_ms);
        Self {
            id,
            config,
            engine,
            policy,
            shares: ShareStore::new(),
            known_owners: BTreeMap::new(),
            pending: BTreeMap::new(),
            paired_owner: None,
            owner_liveness,
            scheduled: Vec::new(),
            next_liveness: None,
        }
    }

    pub fn helper_id(&self) -> HelperId {
        self.id
    }

    pub fn participant(&self) -> ParticipantId {
        ParticipantId::Helper(self.id)
    }

    pub fn is_paired(&self) -> bool {
        self.paired_owner.is_some()
    }

    pub fn paired_owner(&self) -> Option<&str> {
        self.paired_owner.as_deref()
    }

    pub fn is_owner_connected(&self) -> bool {
        self.owner_liveness.is_online(ParticipantId::Owner)
    }

    pub fn owner_last_seen(&self) -> Option<Timestamp> {
        self.owner_liveness.last_seen(ParticipantId::Owner)
    }

    pub fn shares(&self) -> &ShareStore {
        &self.shares
    }

    pub fn share(&self, secret_id: &SecretId) -> Option<&StoredShare> {
        self.shares.get(secret_id)
    }

    pub fn known_owner(&self, name: &str) -> Option<&KnownOwner> {
        self.known_owners.get(name)
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &PendingPairingRequest> {
        self.pending.values()
    }

    /// Drop a stored share (simulates a helper losing its data)
    pub fn forget_share(&mut self, secret_id: &SecretId) -> bool {
        let removed = self.shares.remove(secret_id).is_some();
        if removed {
            warn!("Helper {} discarded share for secret {}", self.id, secret_id.short());
        }
        removed
    }

    pub fn snapshot(&self) -> HelperSnapshot {
        HelperSnapshot {
            id: self.id,
            owner_connected: self.is_owner_connected(),
            owner_last_seen: self.owner_last_seen(),
            paired_owner: self.paired_owner.clone(),
            shares: self.shares.inventory(None),
            known_owners: self.known_owners.values().cloned().collect(),
            pending_requests: self.pending.values().cloned().collect(),
        }
    }

    // ============ Lifecycle ============

    /// Announce presence and start the liveness timer
    pub fn connect(&mut self, now: Timestamp) -> Vec<Envelope> {
        info!("Helper {} connected to network", self.id);
        self.next_liveness = Some(now.saturating_add(self.config.liveness_check_interval_ms));
        vec![self.announce(now)]
    }

    /// Stop timers and drop queued acknowledgements
    pub fn disconnect(&mut self) {
        self.next_liveness = None;
        self.scheduled.clear();
    }

    /// Fire due timers and release delayed sends
    pub fn tick(&mut self, now: Timestamp) -> Vec<Envelope> {
        if let Some(at) = self.next_liveness {
            if now >= at {
                if !self.owner_liveness.sweep(now).is_empty() {
                    warn!("Helper {}: owner appears to be offline", self.id);
                }
                self.next_liveness =
                    Some(now.saturating_add(self.config.liveness_check_interval_ms));
            }
        }

        let (due, later): (Vec<_>, Vec<_>) = self.scheduled.drain(..).partition(|s| s.due <= now);
        self.scheduled = later;
        due.into_iter().map(|s| s.envelope).collect()
    }

    fn announce(&self, now: Timestamp) -> Envelope {
        Envelope::broadcast(
            self.participant(),
            Message::Announce {
                role: Role::Helper,
                helper_id: Some(self.id),
                transport_uri: self.id.transport_uri(),
            },
            now,
        )
    }

    fn reply(&self, message: Message, now: Timestamp) -> Envelope {
        Envelope::direct(self.participant(), ParticipantId::Owner, message, now)
    }

    // ============ Inbound messages ============

    /// Apply one inbound envelope
    pub fn handle_message(&mut self, envelope: &Envelope, now: Timestamp) -> Vec<Envelope> {
        if envelope.from != ParticipantId::Owner {
            return Vec::new();
        }

        match &envelope.message {
            Message::Announce {
                role: Role::Owner, ..
            } => self.on_owner_announce(now),
            Message::PairingRequest {
                channel_id,
                contact_message,
                owner_name,
                is_recovery_mode,
            } => {
                self.on_pairing_request(
                    *channel_id,
                    contact_message,
                    owner_name,
                    *is_recovery_mode,
                    now,
                );
                Vec::new()
            }
            Message::ShareDistribution {
                secret_id,
                share_data,
                version,
            } => {
                self.on_share_distribution(secret_id, share_data, *version, now);
                Vec::new()
            }
            Message::RecoveryRequest {
                secret_id,
                request_data,
            } => self.on_recovery_request(secret_id, request_data, now),
            Message::VerificationRequest {
                secret_id,
                request_data,
            } => vec![self.on_verification_request(secret_id, request_data, now)],
            Message::ListSharesRequest => vec![self.on_list_shares_request(now)],
            other => {
                debug!("Helper {} ignoring {}", self.id, other.kind());
                Vec::new()
            }
        }
    }

    fn on_owner_announce(&mut self, now: Timestamp) -> Vec<Envelope> {
        if self.owner_liveness.observe(ParticipantId::Owner, now) {
            info!("Helper {}: owner came online", self.id);
        }
        // Answer so an owner that arrived after our first announce sees us
        vec![self.announce(now)]
    }

    fn on_pairing_request(
        &mut self,
        channel_id: ChannelId,
        contact_message: &[u8],
        owner_name: &str,
        is_recovery_mode: bool,
        now: Timestamp,
    ) {
        if channel_id != self.id.channel_id() {
            warn!(
                "Helper {} ignoring pairing request for channel {}",
                self.id, channel_id
            );
            return;
        }
        if self.pending.contains_key(owner_name) {
            debug!("Helper {}: pairing request from \"{}\" already pending", self.id, owner_name);
            return;
        }

        let existing_secret_count = self
            .known_owners
            .get(owner_name)
            .map_or(0, |owner| owner.secret_ids.len() as u32);
        if is_recovery_mode {
            info!(
                "Helper {}: recovery pairing request from \"{}\" ({} secret(s) on file)",
                self.id, owner_name, existing_secret_count
            );
        } else {
            info!("Helper {}: received pairing request from \"{}\"", self.id, owner_name);
        }

        self.pending.insert(
            owner_name.to_string(),
            PendingPairingRequest {
                channel_id,
                owner_name: owner_name.to_string(),
                is_recovery_mode,
                contact_message: contact_message.to_vec(),
                requested_at: now,
                existing_secret_count,
            },
        );
    }

    fn on_share_distribution(
        &mut self,
        secret_id: &SecretId,
        share_data: &[u8],
        version: u32,
        now: Timestamp,
    ) {
        let owner_name = match &self.paired_owner {
            Some(name) => name.clone(),
            None => {
                warn!(
                    "Helper {} storing share for {} without a paired owner",
                    self.id,
                    secret_id.short()
                );
                UNKNOWN_OWNER.to_string()
            }
        };

        let replaced = self.shares.upsert(StoredShare {
            secret_id: secret_id.clone(),
            share_data: share_data.to_vec(),
            version,
            received_at: now,
            owner_name: owner_name.clone(),
        });
        if let Some(owner) = self.known_owners.get_mut(&owner_name) {
            owner.secret_ids.insert(secret_id.clone());
        }
        match replaced {
            Some(previous) => info!(
                "Helper {} replaced share for secret {} (v{} -> v{})",
                self.id,
                secret_id.short(),
                previous,
                version
            ),
            None => info!(
                "Helper {} stored share for secret {} (v{})",
                self.id,
                secret_id.short(),
                version
            ),
        }

        let ack = self.reply(
            Message::ShareAck {
                secret_id: secret_id.clone(),
                received: true,
            },
            now,
        );
        self.scheduled.push(Scheduled {
            due: now.saturating_add(self.config.share_ack_delay_ms),
            envelope: ack,
        });
    }

    fn on_recovery_request(
        &mut self,
        secret_id: &SecretId,
        request: &[u8],
        now: Timestamp,
    ) -> Vec<Envelope> {
        info!("Helper {}: recovery request for secret {}", self.id, secret_id.short());
        let Some(share) = self.shares.get(secret_id) else {
            warn!("Helper {}: share not found for requested secret", self.id);
            return Vec::new();
        };
        if !self.policy.authorize(share, self.paired_owner.as_deref()) {
            warn!(
                "Helper {}: recovery of {} refused by {} policy",
                self.id,
                secret_id.short(),
                self.policy.name()
            );
            return Vec::new();
        }

        match self.engine.generate_share_response(
            secret_id.as_bytes(),
            self.id.channel_id(),
            &share.share_data,
            request,
        ) {
            Ok(response) => {
                info!("Helper {}: sent share response for recovery", self.id);
                vec![self.reply(
                    Message::RecoveryResponse {
                        secret_id: secret_id.clone(),
                        share_data: response,
                    },
                    now,
                )]
            }
            Err(e) => {
                error!("Helper {}: failed to generate response: {}", self.id, e);
                Vec::new()
            }
        }
    }

    fn on_verification_request(
        &mut self,
        secret_id: &SecretId,
        request: &[u8],
        now: Timestamp,
    ) -> Envelope {
        let (valid, response_data, reason) = match self.shares.get(secret_id) {
            None => {
                warn!("Helper {}: share not found for verification", self.id);
                (false, Vec::new(), Some(VerificationFailure::NoShare))
            }
            Some(share) => match self.engine.generate_verification_response(
                secret_id.as_bytes(),
                self.id.channel_id(),
                &share.share_data,
                request,
            ) {
                Ok(response) => {
                    debug!("Helper {}: sent verification response", self.id);
                    (true, response, None)
                }
                Err(e) => {
                    error!("Helper {}: verification failed: {}", self.id, e);
                    (false, Vec::new(), Some(VerificationFailure::Invalid))
                }
            },
        };

        self.reply(
            Message::VerificationResponse {
                secret_id: secret_id.clone(),
                response_data,
                valid,
                reason,
            },
            now,
        )
    }

    fn on_list_shares_request(&mut self, now: Timestamp) -> Envelope {
        let shares = self.shares.inventory(self.paired_owner.as_deref());
        info!("Helper {}: sent list of {} share(s) to owner", self.id, shares.len());
        self.reply(Message::ListSharesResponse { shares }, now)
    }

    // ============ Operator decisions ============

    /// Accept the pending request from `owner_name`
    pub fn approve_pairing(&mut self, owner_name: &str, now: Timestamp) -> Result<Vec<Envelope>> {
        let request = self.take_pending(owner_name)?;

        self.paired_owner = Some(request.owner_name.clone());
        self.known_owners
            .entry(request.owner_name.clone())
            .and_modify(|owner| owner.last_seen_at = now)
            .or_insert_with(|| KnownOwner {
                name: request.owner_name.clone(),
                secret_ids: Default::default(),
                first_paired_at: now,
                last_seen_at: now,
            });

        let contact = self
            .engine
            .create_contact_message(self.id.channel_id(), &self.id.transport_uri())
            .unwrap_or_else(|e| {
                error!("Helper {}: failed to create contact message: {}", self.id, e);
                Vec::new()
            });

        info!("Helper {} paired with \"{}\"", self.id, request.owner_name);
        Ok(vec![self.reply(
            Message::PairingResponse {
                channel_id: request.channel_id,
                response_data: contact,
                accepted: true,
                existing_secret_count: Some(request.existing_secret_count),
            },
            now,
        )])
    }

    /// Refuse the pending request from `owner_name`
    pub fn deny_pairing(&mut self, owner_name: &str, now: Timestamp) -> Result<Vec<Envelope>> {
        let request = self.take_pending(owner_name)?;
        info!("Helper {} denied pairing with \"{}\"", self.id, request.owner_name);
        Ok(vec![self.reply(
            Message::PairingResponse {
                channel_id: request.channel_id,
                response_data: Vec::new(),
                accepted: false,
                existing_secret_count: None,
            },
            now,
        )])
    }

    fn take_pending(&mut self, owner_name: &str) -> Result<PendingPairingRequest> {
        self.pending.remove(owner_name).ok_or_else(|| {
            let reason = format!("No pending pairing request from \"{}\"", owner_name);
            warn!("Helper {}: {}", self.id, reason);
            NodeError::PreconditionNotMet(reason)
        })
    }
}

impl Participant for Helper {
    fn id(&self) -> ParticipantId {
        self.participant()
    }

    fn on_connect(&mut self, now: Timestamp) -> Vec<Envelope> {
        self.connect(now)
    }

    fn on_message(&mut self, envelope: &Envelope, now: Timestamp) -> Vec<Envelope> {
        self.handle_message(envelope, now)
    }

    fn on_tick(&mut self, now: Timestamp) -> Vec<Envelope> {
        self.tick(now)
    }

    fn on_disconnect(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derec_engine::ShamirEngine;

    fn helper(n: u8) -> Helper {
        Helper::new(
            HelperId::new(n).unwrap(),
            NodeConfig::default(),
            Arc::new(ShamirEngine::from_seed(n as u64)),
        )
    }

    fn from_owner(message: Message) -> Envelope {
        Envelope::broadcast(ParticipantId::Owner, message, 0)
    }

    fn pairing_request(n: u8, owner: &str) -> Envelope {
        from_owner(Message::PairingRequest {
            channel_id: ChannelId::new(n as u64),
            contact_message: vec![1, 2, 3],
            owner_name: owner.to_string(),
            is_recovery_mode: false,
        })
    }

    fn distribution(id: &SecretId, version: u32, data: Vec<u8>) -> Envelope {
        from_owner(Message::ShareDistribution {
            secret_id: id.clone(),
            share_data: data,
            version,
        })
    }

    #[test]
    fn test_owner_announce_triggers_reannounce() {
        let mut h = helper(1);
        let out = h.handle_message(
            &from_owner(Message::Announce {
                role: Role::Owner,
                helper_id: None,
                transport_uri: "local://owner".to_string(),
            }),
            500,
        );
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].message, Message::Announce { role: Role::Helper, .. }));
        assert!(h.is_owner_connected());
        assert_eq!(h.owner_last_seen(), Some(500));
    }

    #[test]
    fn test_owner_goes_offline_after_threshold() {
        let mut h = helper(1);
        h.connect(0);
        h.handle_message(
            &from_owner(Message::Announce {
                role: Role::Owner,
                helper_id: None,
                transport_uri: "local://owner".to_string(),
            }),
            0,
        );
        h.tick(15_000);
        assert!(h.is_owner_connected());
        h.tick(16_001);
        assert!(!h.is_owner_connected());
    }

    #[test]
    fn test_pairing_waits_for_approval() {
        let mut h = helper(2);
        assert!(h.handle_message(&pairing_request(2, "Alice"), 10).is_empty());
        assert!(h.handle_message(&pairing_request(2, "Alice"), 20).is_empty());
        assert_eq!(h.pending_requests().count(), 1);
        assert_eq!(h.pending_requests().next().unwrap().requested_at, 10);
        assert!(!h.is_paired());

        let out = h.approve_pairing("Alice", 30).unwrap();
        assert!(matches!(
            &out[0].message,
            Message::PairingResponse { accepted: true, existing_secret_count: Some(0), response_data, .. }
                if !response_data.is_empty()
        ));
        assert_eq!(out[0].to, Some(ParticipantId::Owner));
        assert_eq!(h.paired_owner(), Some("Alice"));
        assert_eq!(h.pending_requests().count(), 0);
    }

    #[test]
    fn test_deny_pairing() {
        let mut h = helper(3);
        h.handle_message(&pairing_request(3, "Mallory"), 0);
        let out = h.deny_pairing("Mallory", 1).unwrap();
        assert!(matches!(
            out[0].message,
            Message::PairingResponse { accepted: false, existing_secret_count: None, .. }
        ));
        assert!(!h.is_paired());
        assert!(h.known_owner("Mallory").is_none());
        assert!(matches!(
            h.deny_pairing("Mallory", 2),
            Err(NodeError::PreconditionNotMet(_))
        ));
    }

    #[test]
    fn test_share_acked_once_after_delay() {
        let mut h = helper(1);
        h.handle_message(&pairing_request(1, "Alice"), 0);
        h.approve_pairing("Alice", 0).unwrap();

        let id = SecretId::new(vec![5; 16]);
        assert!(h.handle_message(&distribution(&id, 1, vec![9]), 1_000).is_empty());
        assert!(h.tick(1_050).is_empty());

        let acks = h.tick(1_100);
        assert_eq!(acks.len(), 1);
        assert!(matches!(&acks[0].message, Message::ShareAck { received: true, .. }));
        assert!(h.tick(5_000).is_empty());

        assert_eq!(h.share(&id).unwrap().owner_name, "Alice");
        assert!(h.known_owner("Alice").unwrap().secret_ids.contains(&id));
    }

    #[test]
    fn test_huge_ack_delay_holds_ack() {
        let config = NodeConfig {
            share_ack_delay_ms: u64::MAX,
            liveness_check_interval_ms: u64::MAX,
            ..NodeConfig::default()
        };
        let mut h = Helper::new(
            HelperId::new(2).unwrap(),
            config,
            Arc::new(ShamirEngine::from_seed(2)),
        );
        h.connect(1_000);

        let id = SecretId::new(vec![6; 16]);
        assert!(h.handle_message(&distribution(&id, 1, vec![9]), 1_000).is_empty());
        assert!(h.tick(u64::MAX - 1).is_empty());
        assert_eq!(h.tick(u64::MAX).len(), 1);
    }

    #[test]
    fn test_unpaired_share_attributed_to_unknown() {
        let mut h = helper(1);
        let id = SecretId::new(vec![1]);
        h.handle_message(&distribution(&id, 1, vec![1]), 0);
        assert_eq!(h.share(&id).unwrap().owner_name, UNKNOWN_OWNER);
    }

    #[test]
    fn test_later_distribution_overwrites() {
        let mut h = helper(1);
        let id = SecretId::new(vec![2]);
        h.handle_message(&distribution(&id, 1, vec![1]), 0);
        h.handle_message(&distribution(&id, 2, vec![2]), 10);

        let stored = h.share(&id).unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.share_data, vec![2]);
        assert_eq!(h.shares().len(), 1);
    }

    #[test]
    fn test_verification_without_share() {
        let mut h = helper(1);
        let out = h.handle_message(
            &from_owner(Message::VerificationRequest {
                secret_id: SecretId::new(vec![3]),
                request_data: vec![0],
            }),
            0,
        );
        assert!(matches!(
            out[0].message,
            Message::VerificationResponse { valid: false, reason: Some(VerificationFailure::NoShare), .. }
        ));
    }

    #[test]
    fn test_verification_with_garbage_share_is_invalid() {
        let mut h = helper(1);
        let id = SecretId::new(vec![4]);
        h.handle_message(&distribution(&id, 1, vec![0xff]), 0);
        let out = h.handle_message(
            &from_owner(Message::VerificationRequest {
                secret_id: id,
                request_data: vec![0],
            }),
            1,
        );
        assert!(matches!(
            out[0].message,
            Message::VerificationResponse { valid: false, reason: Some(VerificationFailure::Invalid), .. }
        ));
    }

    #[test]
    fn test_recovery_request_for_missing_share_is_dropped() {
        let mut h = helper(1);
        let out = h.handle_message(
            &from_owner(Message::RecoveryRequest {
                secret_id: SecretId::new(vec![8]),
                request_data: vec![],
            }),
            0,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_list_shares_filters_to_paired_owner() {
        let mut h = helper(1);
        let stray = SecretId::new(vec![1]);
        h.handle_message(&distribution(&stray, 1, vec![1]), 0);

        // Unpaired: everything is listed
        let out = h.handle_message(&from_owner(Message::ListSharesRequest), 1);
        assert!(matches!(&out[0].message, Message::ListSharesResponse { shares } if shares.len() == 1));

        h.handle_message(&pairing_request(1, "Alice"), 2);
        h.approve_pairing("Alice", 3).unwrap();
        let mine = SecretId::new(vec![2]);
        h.handle_message(&distribution(&mine, 1, vec![2]), 4);

        let out = h.handle_message(&from_owner(Message::ListSharesRequest), 5);
        match &out[0].message {
            Message::ListSharesResponse { shares } => {
                assert_eq!(shares.len(), 1);
                assert_eq!(shares[0].secret_id, mine);
                assert_eq!(shares[0].owner_name, "Alice");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_existing_secret_count_on_repairing() {
        let mut h = helper(1);
        h.handle_message(&pairing_request(1, "Alice"), 0);
        h.approve_pairing("Alice", 0).unwrap();
        h.handle_message(&distribution(&SecretId::new(vec![1]), 1, vec![1]), 1);
        h.handle_message(&distribution(&SecretId::new(vec![2]), 1, vec![2]), 2);

        h.handle_message(&pairing_request(1, "Alice"), 10);
        assert_eq!(h.pending_requests().next().unwrap().existing_secret_count, 2);
        let out = h.approve_pairing("Alice", 11).unwrap();
        assert!(matches!(
            out[0].message,
            Message::PairingResponse { existing_secret_count: Some(2), .. }
        ));
        assert_eq!(h.known_owner("Alice").unwrap().first_paired_at, 0);
        assert_eq!(h.known_owner("Alice").unwrap().last_seen_at, 11);
    }

    #[test]
    fn test_messages_from_other_helpers_ignored() {
        let mut h = helper(1);
        let spoofed = Envelope::broadcast(
            ParticipantId::Helper(HelperId::new(2).unwrap()),
            Message::ListSharesRequest,
            0,
        );
        assert!(h.handle_message(&spoofed, 0).is_empty());
    }
}
