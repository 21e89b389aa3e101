//! Owner state machine
//!
//! The owner discovers helpers, pairs with them, splits secrets across the
//! paired set, keeps checking that helpers still hold their shares, and
//! drives recovery. It is sans-IO: every entry point takes the current
//! time and returns the envelopes to publish. The owner runs one workflow
//! at a time; share discovery runs alongside whatever workflow is active.

pub mod recovery;
pub mod registry;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use derec_core::{
    Envelope, HelperId, LivenessTracker, Message, ParticipantId, Role, SecretId, ShareInfo,
    Timestamp, VerificationFailure, DEFAULT_THRESHOLD, DISCOVERY_QUORUM, INITIAL_SECRET_VERSION,
    MIN_PAIRED_HELPERS,
};
use derec_engine::SecretSharingEngine;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::runtime::Participant;

pub use recovery::{Recorded, RecoveryCoordinator, RecoverySession, RecoverySource};
pub use registry::{HelperRegistry, PairedHelper, VerificationStatus};

/// Name given to secrets protected without one
pub const UNNAMED_SECRET: &str = "Unnamed Secret";

/// Name given to secrets rebuilt from discovery
pub const RECOVERED_SECRET: &str = "Recovered Secret";

/// A secret protected by this owner
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedSecret {
    pub id: SecretId,
    pub name: String,
    #[serde(skip)]
    pub value: String,
    pub version: u32,
    pub threshold: usize,
    pub helper_count: usize,
    pub created_at: Timestamp,
}

impl fmt::Debug for ProtectedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedSecret")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("version", &self.version)
            .field("threshold", &self.threshold)
            .field("helper_count", &self.helper_count)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A secret reported by helpers during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredSecret {
    pub secret_id: SecretId,
    /// Highest version any helper reported
    pub version: u32,
    /// Helpers that reported it
    pub reporters: BTreeSet<HelperId>,
}

impl DiscoveredSecret {
    /// Number of distinct helpers holding a share
    pub fn helper_count(&self) -> usize {
        self.reporters.len()
    }

    /// Whether enough helpers hold it to attempt recovery
    pub fn is_recoverable(&self) -> bool {
        self.helper_count() >= DISCOVERY_QUORUM
    }
}

/// Plaintext produced by the last successful recovery
#[derive(Clone, PartialEq, Eq)]
pub struct RecoveredSecret {
    pub secret_id: SecretId,
    pub name: String,
    pub value: String,
    pub recovered_at: Timestamp,
}

impl fmt::Debug for RecoveredSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveredSecret")
            .field("secret_id", &self.secret_id)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("recovered_at", &self.recovered_at)
            .finish()
    }
}

/// The workflow slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Workflow {
    Idle,
    /// Waiting for pairing responses
    Pairing {
        awaiting: BTreeSet<HelperId>,
        deadline: Timestamp,
    },
    /// Waiting for share acknowledgements
    Protecting {
        secret_id: SecretId,
        awaiting: BTreeSet<HelperId>,
        deadline: Timestamp,
    },
    /// Collecting recovery responses
    Recovering {
        secret_id: SecretId,
        deadline: Timestamp,
    },
}

impl Workflow {
    pub fn name(&self) -> &'static str {
        match self {
            Workflow::Idle => "idle",
            Workflow::Pairing { .. } => "pairing",
            Workflow::Protecting { .. } => "protecting",
            Workflow::Recovering { .. } => "recovering",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Workflow::Idle)
    }
}

/// Read-only view of the owner's state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSnapshot {
    pub helpers: Vec<PairedHelper>,
    pub online: Vec<HelperId>,
    pub secrets: Vec<ProtectedSecret>,
    pub discovered: Vec<DiscoveredSecret>,
    pub workflow: Workflow,
    pub recovery_mode: bool,
}

#[derive(Debug, Default)]
struct Timers {
    next_announce: Option<Timestamp>,
    next_liveness: Option<Timestamp>,
    next_verification: Option<Timestamp>,
}

/// The owner role
pub struct Owner {
    config: NodeConfig,
    engine: Arc<dyn SecretSharingEngine>,
    helpers: HelperRegistry,
    liveness: LivenessTracker<HelperId>,
    secrets: Vec<ProtectedSecret>,
    discovered: BTreeMap<SecretId, DiscoveredSecret>,
    recovery_mode: bool,
    workflow: Workflow,
    recovery: RecoveryCoordinator,
    recovered: Option<RecoveredSecret>,
    timers: Timers,
}

impl Owner {
    /// Create an owner using `engine` for all secret-sharing operations
    pub fn new(config: NodeConfig, engine: Arc<dyn SecretSharingEngine>) -> Self {
        let liveness = LivenessTracker::new(config.offline_threshold_ms);
        Self {
            config,
            engine,
            helpers: HelperRegistry::new(),
            liveness,
            secrets: Vec::new(),
            discovered: BTreeMap::new(),
            recovery_mode: false,
            workflow: Workflow::Idle,
            recovery: RecoveryCoordinator::new(),
            recovered: None,
            timers: Timers::default(),
        }
    }

    // ============ Accessors ============

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn helper(&self, id: HelperId) -> Option<&PairedHelper> {
        self.helpers.get(id)
    }

    pub fn paired_count(&self) -> usize {
        self.helpers.paired_count()
    }

    /// Whether `id` is in the connected set
    pub fn is_online(&self, id: HelperId) -> bool {
        self.liveness.is_online(id)
    }

    pub fn online_helpers(&self) -> Vec<HelperId> {
        self.liveness.online_peers()
    }

    pub fn secrets(&self) -> &[ProtectedSecret] {
        &self.secrets
    }

    pub fn secret(&self, id: &SecretId) -> Option<&ProtectedSecret> {
        self.secrets.iter().find(|s| &s.id == id)
    }

    pub fn discovered(&self, id: &SecretId) -> Option<&DiscoveredSecret> {
        self.discovered.get(id)
    }

    pub fn discovered_secrets(&self) -> impl Iterator<Item = &DiscoveredSecret> {
        self.discovered.values()
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn recovery_mode(&self) -> bool {
        self.recovery_mode
    }

    /// The most recently recovered plaintext
    pub fn recovered(&self) -> Option<&RecoveredSecret> {
        self.recovered.as_ref()
    }

    /// Recovery responses held for `secret_id`
    pub fn pending_recovery_shares(&self, secret_id: &SecretId) -> usize {
        self.recovery.pending_count(secret_id)
    }

    /// Whether the verification heartbeat is armed
    pub fn verification_scheduled(&self) -> Option<Timestamp> {
        self.timers.next_verification
    }

    pub fn snapshot(&self) -> OwnerSnapshot {
        OwnerSnapshot {
            helpers: self.helpers.snapshot(),
            online: self.liveness.online_peers(),
            secrets: self.secrets.clone(),
            discovered: self.discovered.values().cloned().collect(),
            workflow: self.workflow.clone(),
            recovery_mode: self.recovery_mode,
        }
    }

    // ============ Lifecycle ============

    /// Announce presence and start the periodic timers
    pub fn connect(&mut self, now: Timestamp) -> Vec<Envelope> {
        info!("Owner connected to network");
        self.timers.next_announce = Some(now.saturating_add(self.config.announce_interval_ms));
        self.timers.next_liveness =
            Some(now.saturating_add(self.config.liveness_check_interval_ms));
        self.refresh_verification_timer(now);
        vec![self.announce(now)]
    }

    /// Stop all timers
    pub fn disconnect(&mut self) {
        self.timers = Timers::default();
        debug!("Owner timers stopped");
    }

    /// Fire whatever timers are due at `now`
    pub fn tick(&mut self, now: Timestamp) -> Vec<Envelope> {
        let mut out = Vec::new();

        if let Some(at) = self.timers.next_announce {
            if now >= at {
                out.push(self.announce(now));
                self.timers.next_announce =
                    Some(now.saturating_add(self.config.announce_interval_ms));
            }
        }

        if let Some(at) = self.timers.next_liveness {
            if now >= at {
                for id in self.liveness.sweep(now) {
                    warn!("Helper {} went offline", id);
                }
                self.timers.next_liveness =
                    Some(now.saturating_add(self.config.liveness_check_interval_ms));
            }
        }

        self.refresh_verification_timer(now);
        if let Some(at) = self.timers.next_verification {
            if now >= at {
                out.extend(self.verify_helpers(now));
                self.timers.next_verification =
                    Some(now.saturating_add(self.config.verification_interval_ms));
            }
        }

        self.expire_workflow(now);
        out
    }

    fn announce(&self, now: Timestamp) -> Envelope {
        Envelope::broadcast(
            ParticipantId::Owner,
            Message::Announce {
                role: Role::Owner,
                helper_id: None,
                transport_uri: ParticipantId::Owner.transport_uri(),
            },
            now,
        )
    }

    fn direct(&self, to: HelperId, message: Message, now: Timestamp) -> Envelope {
        Envelope::direct(ParticipantId::Owner, to.into(), message, now)
    }

    fn require_idle(&self, action: &str) -> Result<()> {
        if self.workflow.is_idle() {
            return Ok(());
        }
        let reason = format!("Cannot start {} while {}", action, self.workflow.name());
        warn!("{}", reason);
        Err(NodeError::PreconditionNotMet(reason))
    }

    fn precondition<T>(reason: String) -> Result<T> {
        warn!("{}", reason);
        Err(NodeError::PreconditionNotMet(reason))
    }

    // ============ Inbound messages ============

    /// Apply one inbound envelope
    pub fn handle_message(&mut self, envelope: &Envelope, now: Timestamp) -> Vec<Envelope> {
        let Some(id) = envelope.from.helper_id() else {
            debug!("Owner ignoring {} from {}", envelope.message.kind(), envelope.from);
            return Vec::new();
        };

        let out = match &envelope.message {
            Message::Announce {
                role: Role::Helper, ..
            } => {
                self.on_helper_announce(id, now);
                Vec::new()
            }
            Message::PairingResponse {
                accepted,
                existing_secret_count,
                ..
            } => {
                self.on_pairing_response(id, *accepted, *existing_secret_count, now);
                Vec::new()
            }
            Message::ShareAck {
                secret_id,
                received,
            } => {
                self.on_share_ack(id, secret_id, *received, now);
                Vec::new()
            }
            Message::VerificationResponse {
                secret_id,
                valid,
                reason,
                ..
            } => {
                self.on_verification_response(id, secret_id, *valid, *reason, now);
                Vec::new()
            }
            Message::RecoveryResponse {
                secret_id,
                share_data,
            } => {
                self.on_recovery_response(id, secret_id, share_data, now);
                Vec::new()
            }
            Message::ListSharesResponse { shares } => {
                self.on_list_shares_response(id, shares, now);
                Vec::new()
            }
            other => {
                debug!("Owner ignoring {} from Helper {}", other.kind(), id);
                Vec::new()
            }
        };

        self.refresh_verification_timer(now);
        out
    }

    fn saw(&mut self, id: HelperId, now: Timestamp) {
        if self.liveness.observe(id, now) {
            info!("Helper {} came online", id);
        }
    }

    fn on_helper_announce(&mut self, id: HelperId, now: Timestamp) {
        self.saw(id, now);
        self.helpers.announced(id, now);
    }

    fn on_pairing_response(
        &mut self,
        id: HelperId,
        accepted: bool,
        existing_secret_count: Option<u32>,
        now: Timestamp,
    ) {
        self.saw(id, now);
        self.helpers.responded(id, now);

        if accepted {
            if self.helpers.mark_paired(id, now) {
                info!("Paired with Helper {}", id);
            } else {
                debug!("Helper {} re-confirmed pairing", id);
            }
            if let Some(count) = existing_secret_count.filter(|c| *c > 0) {
                info!("Helper {} already holds {} secret(s) for this owner", id, count);
            }
        } else {
            warn!("Helper {} declined pairing", id);
        }

        if let Workflow::Pairing { awaiting, .. } = &mut self.workflow {
            awaiting.remove(&id);
            if awaiting.is_empty() {
                info!("Pairing complete: {} helper(s) paired", self.helpers.paired_count());
                self.workflow = Workflow::Idle;
            }
        }
    }

    fn on_share_ack(&mut self, id: HelperId, secret_id: &SecretId, received: bool, now: Timestamp) {
        self.saw(id, now);
        self.helpers.responded(id, now);

        if !self.helpers.is_paired(id) {
            warn!("Ignoring SHARE_ACK from unpaired Helper {}", id);
            return;
        }
        if self.secret(secret_id).is_none() {
            warn!("Helper {} acknowledged unknown secret {}", id, secret_id.short());
            return;
        }
        if !received {
            warn!("Helper {} reported it did not store secret {}", id, secret_id.short());
            return;
        }

        self.helpers.set_has_share(id, true);
        info!("Helper {} confirmed share receipt", id);

        if let Workflow::Protecting {
            secret_id: protecting,
            awaiting,
            ..
        } = &mut self.workflow
        {
            if protecting == secret_id {
                awaiting.remove(&id);
                if awaiting.is_empty() {
                    info!("All helpers confirmed their shares");
                    self.workflow = Workflow::Idle;
                }
            }
        }
    }

    fn on_verification_response(
        &mut self,
        id: HelperId,
        secret_id: &SecretId,
        valid: bool,
        reason: Option<VerificationFailure>,
        now: Timestamp,
    ) {
        self.saw(id, now);
        self.helpers.responded(id, now);

        let Some(name) = self.secret(secret_id).map(|s| s.name.clone()) else {
            debug!("Verification response for unknown secret {}", secret_id.short());
            return;
        };

        let status = match (valid, reason) {
            (true, _) => VerificationStatus::Valid,
            (false, Some(VerificationFailure::NoShare)) => VerificationStatus::NoShare,
            (false, _) => VerificationStatus::Invalid,
        };
        if !self.helpers.set_verification(id, status, now) {
            warn!("Ignoring VERIFICATION_RESPONSE from unpaired Helper {}", id);
            return;
        }

        match status {
            VerificationStatus::Valid => debug!("Helper {} verified share for \"{}\"", id, name),
            VerificationStatus::NoShare => warn!("Helper {} lost share for \"{}\"", id, name),
            _ => error!("Helper {} failed verification for \"{}\"", id, name),
        }
    }

    fn on_recovery_response(
        &mut self,
        id: HelperId,
        secret_id: &SecretId,
        share_data: &[u8],
        now: Timestamp,
    ) {
        self.saw(id, now);
        self.helpers.responded(id, now);

        if !matches!(self.workflow, Workflow::Recovering { .. }) {
            warn!("Ignoring RECOVERY_RESPONSE from Helper {}: no recovery in progress", id);
            return;
        }

        match self.recovery.record(secret_id, id, share_data.to_vec()) {
            Recorded::Stored { count } => {
                info!("Received share from Helper {} ({} so far)", id, count);
                self.try_reconstruct(now);
            }
            Recorded::NoSession => {
                warn!("Helper {} returned a share for unrequested secret {}", id, secret_id.short());
            }
            Recorded::AlreadyAttempted => {
                debug!("Late share from Helper {} for {}", id, secret_id.short());
            }
        }
    }

    fn on_list_shares_response(&mut self, id: HelperId, shares: &[ShareInfo], now: Timestamp) {
        self.saw(id, now);
        self.helpers.responded(id, now);
        self.helpers.set_has_share(id, !shares.is_empty());

        if !self.recovery_mode {
            debug!("Share list from Helper {} outside recovery mode", id);
            return;
        }

        info!("Helper {} has {} share(s)", id, shares.len());
        for share in shares {
            let entry = self
                .discovered
                .entry(share.secret_id.clone())
                .or_insert_with(|| DiscoveredSecret {
                    secret_id: share.secret_id.clone(),
                    version: share.version,
                    reporters: BTreeSet::new(),
                });
            let was_recoverable = entry.is_recoverable();
            entry.version = entry.version.max(share.version);
            entry.reporters.insert(id);
            if !was_recoverable && entry.is_recoverable() {
                info!(
                    "Secret {} found on {} helpers, ready to recover",
                    share.secret_id.short(),
                    entry.helper_count()
                );
            }
        }
    }

    // ============ Pairing ============

    /// Send a pairing request to every online helper
    pub fn pair_with_helpers(&mut self, now: Timestamp) -> Result<Vec<Envelope>> {
        self.require_idle("pairing")?;
        let online = self.liveness.online_peers();
        if online.is_empty() {
            return Self::precondition("No helpers online to pair with".to_string());
        }

        let mut out = Vec::new();
        let mut awaiting = BTreeSet::new();
        for id in online {
            match self
                .engine
                .create_contact_message(id.channel_id(), &id.transport_uri())
            {
                Ok(contact) => {
                    out.push(self.direct(
                        id,
                        Message::PairingRequest {
                            channel_id: id.channel_id(),
                            contact_message: contact,
                            owner_name: self.config.owner_name.clone(),
                            is_recovery_mode: self.recovery_mode,
                        },
                        now,
                    ));
                    awaiting.insert(id);
                    info!("Sent pairing request to Helper {}", id);
                }
                Err(e) => error!("Failed to create contact for Helper {}: {}", id, e),
            }
        }

        if !awaiting.is_empty() {
            self.workflow = Workflow::Pairing {
                awaiting,
                deadline: now.saturating_add(self.config.pairing_timeout_ms),
            };
        }
        Ok(out)
    }

    // ============ Protection ============

    /// Split `plaintext` across every paired helper
    pub fn protect_secret(
        &mut self,
        name: &str,
        plaintext: &str,
        now: Timestamp,
    ) -> Result<Vec<Envelope>> {
        self.require_idle("protecting")?;
        if plaintext.trim().is_empty() {
            return Self::precondition("Please enter a secret to protect".to_string());
        }
        self.require_paired_quorum()?;

        let secret_id = SecretId::generate();
        info!("Splitting secret into shares...");
        let (out, recipients) = self.distribute(
            &secret_id,
            plaintext.as_bytes(),
            DEFAULT_THRESHOLD,
            INITIAL_SECRET_VERSION,
            now,
        )?;

        let name = match name.trim() {
            "" => UNNAMED_SECRET.to_string(),
            trimmed => trimmed.to_string(),
        };
        info!(
            "Secret \"{}\" split into {} shares (threshold: {})",
            name,
            recipients.len(),
            DEFAULT_THRESHOLD
        );
        self.secrets.push(ProtectedSecret {
            id: secret_id.clone(),
            name,
            value: plaintext.to_string(),
            version: INITIAL_SECRET_VERSION,
            threshold: DEFAULT_THRESHOLD,
            helper_count: recipients.len(),
            created_at: now,
        });
        self.workflow = Workflow::Protecting {
            secret_id,
            awaiting: recipients,
            deadline: now.saturating_add(self.config.protect_timeout_ms),
        };
        Ok(out)
    }

    /// Distribute a fresh version of an existing secret
    pub fn reshare(&mut self, secret_id: &SecretId, now: Timestamp) -> Result<Vec<Envelope>> {
        self.require_idle("re-sharing")?;
        let Some(index) = self.secrets.iter().position(|s| &s.id == secret_id) else {
            return Self::precondition(format!("Unknown secret {}", secret_id.short()));
        };
        self.require_paired_quorum()?;

        let secret = self.secrets[index].clone();
        let version = secret.version + 1;
        let (out, recipients) = self.distribute(
            &secret.id,
            secret.value.as_bytes(),
            secret.threshold,
            version,
            now,
        )?;

        self.helpers.reset_shares();
        let entry = &mut self.secrets[index];
        entry.version = version;
        entry.helper_count = recipients.len();
        info!("Re-shared \"{}\" as version {}", entry.name, version);

        self.workflow = Workflow::Protecting {
            secret_id: secret.id,
            awaiting: recipients,
            deadline: now.saturating_add(self.config.protect_timeout_ms),
        };
        Ok(out)
    }

    fn require_paired_quorum(&self) -> Result<()> {
        let paired = self.helpers.paired_count();
        if paired < MIN_PAIRED_HELPERS {
            return Self::precondition(format!(
                "Need at least {} paired helpers (have {})",
                MIN_PAIRED_HELPERS, paired
            ));
        }
        Ok(())
    }

    /// Split and address one share to each paired helper
    fn distribute(
        &self,
        secret_id: &SecretId,
        plaintext: &[u8],
        threshold: usize,
        version: u32,
        now: Timestamp,
    ) -> Result<(Vec<Envelope>, BTreeSet<HelperId>)> {
        let channels: Vec<_> = self.helpers.paired().map(|h| h.channel_id).collect();
        let shares = self
            .engine
            .protect_secret(secret_id.as_bytes(), plaintext, &channels, threshold, version)
            .map_err(|e| {
                error!("Failed to protect secret: {}", e);
                NodeError::from(e)
            })?;

        let mut out = Vec::with_capacity(shares.len());
        let mut recipients = BTreeSet::new();
        for (channel, share) in shares {
            let id = match HelperId::from_channel(channel) {
                Ok(id) if self.helpers.is_paired(id) => id,
                _ => {
                    error!("Engine produced a share for unknown channel {}", channel);
                    continue;
                }
            };
            out.push(self.direct(
                id,
                Message::ShareDistribution {
                    secret_id: secret_id.clone(),
                    share_data: share,
                    version,
                },
                now,
            ));
            recipients.insert(id);
            info!("Sent share to Helper {}", id);
        }
        Ok((out, recipients))
    }

    // ============ Verification ============

    fn refresh_verification_timer(&mut self, now: Timestamp) {
        let wanted = !self.secrets.is_empty() && self.helpers.any_has_share();
        match (wanted, self.timers.next_verification) {
            (true, None) => {
                debug!("Verification scheduled");
                self.timers.next_verification =
                    Some(now.saturating_add(self.config.verification_initial_delay_ms));
            }
            (false, Some(_)) => {
                debug!("Verification stopped");
                self.timers.next_verification = None;
            }
            _ => {}
        }
    }

    /// Challenge every helper holding a share of the first secret
    pub fn verify_helpers(&mut self, now: Timestamp) -> Vec<Envelope> {
        let Some(secret) = self.secrets.first() else {
            return Vec::new();
        };
        let (secret_id, version) = (secret.id.clone(), secret.version);
        let holders: Vec<HelperId> = self.helpers.with_share().map(|h| h.id).collect();

        let mut out = Vec::new();
        for id in holders {
            match self
                .engine
                .generate_verification_request(secret_id.as_bytes(), version)
            {
                Ok(request) => {
                    out.push(self.direct(
                        id,
                        Message::VerificationRequest {
                            secret_id: secret_id.clone(),
                            request_data: request,
                        },
                        now,
                    ));
                    self.helpers
                        .set_verification(id, VerificationStatus::Pending, now);
                }
                Err(e) => error!("Failed to generate verification request for Helper {}: {}", id, e),
            }
        }
        debug!("Verifying {} helper(s)", out.len());
        out
    }

    // ============ Recovery ============

    /// Ask every helper holding a share of a known secret to return it
    pub fn recover_secret(&mut self, secret_id: &SecretId, now: Timestamp) -> Result<Vec<Envelope>> {
        self.require_idle("recovery")?;
        let Some(secret) = self.secret(secret_id).cloned() else {
            return Self::precondition(format!("Unknown secret {}", secret_id.short()));
        };
        let holders: Vec<HelperId> = self.helpers.with_share().map(|h| h.id).collect();
        if holders.is_empty() {
            return Self::precondition(format!("No helper holds a share of \"{}\"", secret.name));
        }
        if holders.len() < secret.threshold {
            warn!(
                "Only {} helper(s) hold a share of \"{}\" (threshold {})",
                holders.len(),
                secret.name,
                secret.threshold
            );
        }

        info!("Starting recovery for \"{}\"...", secret.name);
        let session = RecoverySession {
            secret_id: secret.id.clone(),
            name: secret.name.clone(),
            version: secret.version,
            threshold: secret.threshold,
            source: RecoverySource::Known,
            started_at: now,
        };
        Ok(self.start_recovery(session, &holders, now))
    }

    /// Ask helpers which shares they hold; enters recovery mode
    pub fn discover_secrets(&mut self, now: Timestamp) -> Result<Vec<Envelope>> {
        let paired: Vec<HelperId> = self.helpers.paired().map(|h| h.id).collect();
        if paired.is_empty() {
            return Self::precondition("No paired helpers to request from".to_string());
        }

        self.set_recovery_mode(true);
        self.discovered.clear();
        Ok(paired
            .into_iter()
            .map(|id| {
                info!("Requested shares list from Helper {}", id);
                self.direct(id, Message::ListSharesRequest, now)
            })
            .collect())
    }

    /// Switch recovery mode; entering it forgets earlier discoveries
    pub fn set_recovery_mode(&mut self, enabled: bool) {
        if enabled && !self.recovery_mode {
            self.discovered.clear();
            info!("Entered recovery mode");
        }
        self.recovery_mode = enabled;
    }

    /// Ask every paired helper for its share of a discovered secret
    pub fn recover_discovered(
        &mut self,
        secret_id: &SecretId,
        now: Timestamp,
    ) -> Result<Vec<Envelope>> {
        self.require_idle("recovery")?;
        let Some(found) = self.discovered.get(secret_id).cloned() else {
            return Self::precondition(format!("Secret {} was not discovered", secret_id.short()));
        };
        if !found.is_recoverable() {
            return Self::precondition(format!(
                "Secret {} found on {} helper(s), need {}",
                secret_id.short(),
                found.helper_count(),
                DISCOVERY_QUORUM
            ));
        }

        let (name, threshold) = match self.secret(secret_id) {
            Some(known) => (known.name.clone(), known.threshold),
            None => (RECOVERED_SECRET.to_string(), DISCOVERY_QUORUM),
        };
        info!("Recovering secret {}...", secret_id.short());
        let session = RecoverySession {
            secret_id: secret_id.clone(),
            name,
            version: found.version,
            threshold,
            source: RecoverySource::Discovered {
                helper_count: found.helper_count(),
            },
            started_at: now,
        };
        let paired: Vec<HelperId> = self.helpers.paired().map(|h| h.id).collect();
        Ok(self.start_recovery(session, &paired, now))
    }

    fn start_recovery(
        &mut self,
        session: RecoverySession,
        targets: &[HelperId],
        now: Timestamp,
    ) -> Vec<Envelope> {
        let mut out = Vec::new();
        for id in targets {
            match self.engine.generate_share_request(
                id.channel_id(),
                session.secret_id.as_bytes(),
                session.version,
            ) {
                Ok(request) => {
                    out.push(self.direct(
                        *id,
                        Message::RecoveryRequest {
                            secret_id: session.secret_id.clone(),
                            request_data: request,
                        },
                        now,
                    ));
                    info!("Sent recovery request to Helper {}", id);
                }
                Err(e) => error!("Failed to generate request for Helper {}: {}", id, e),
            }
        }

        if out.is_empty() {
            warn!("No recovery request could be sent for {}", session.secret_id.short());
            return out;
        }

        self.recovered = None;
        self.workflow = Workflow::Recovering {
            secret_id: session.secret_id.clone(),
            deadline: now.saturating_add(self.config.recovery_timeout_ms),
        };
        self.recovery.begin(session);
        out
    }

    fn try_reconstruct(&mut self, now: Timestamp) {
        let Some((session, responses)) = self.recovery.take_ready() else {
            return;
        };
        info!(
            "Have {}/{} responses, attempting reconstruction...",
            responses.len(),
            session.threshold
        );

        let result = self.engine.recover_from_share_responses(
            &responses,
            session.secret_id.as_bytes(),
            session.version,
        );
        self.recovery.finish();
        self.workflow = Workflow::Idle;

        let plaintext = match result {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!("Reconstruction failed: {}", e);
                return;
            }
        };
        let value = String::from_utf8_lossy(&plaintext).into_owned();

        if let RecoverySource::Discovered { helper_count } = session.source {
            if self.secret(&session.secret_id).is_none() {
                self.secrets.push(ProtectedSecret {
                    id: session.secret_id.clone(),
                    name: session.name.clone(),
                    value: value.clone(),
                    version: session.version,
                    threshold: session.threshold,
                    helper_count,
                    created_at: now,
                });
            }
            self.discovered.remove(&session.secret_id);
            info!("Secret recovered and saved!");
        } else {
            info!("Secret \"{}\" recovered successfully!", session.name);
        }

        self.recovered = Some(RecoveredSecret {
            secret_id: session.secret_id,
            name: session.name,
            value,
            recovered_at: now,
        });
    }

    fn expire_workflow(&mut self, now: Timestamp) {
        match &self.workflow {
            Workflow::Pairing { awaiting, deadline } if now >= *deadline => {
                warn!("Pairing timed out; no answer from {} helper(s)", awaiting.len());
            }
            Workflow::Protecting {
                awaiting, deadline, ..
            } if now >= *deadline => {
                warn!("{} helper(s) did not confirm their share in time", awaiting.len());
            }
            Workflow::Recovering {
                secret_id,
                deadline,
            } if now >= *deadline => {
                warn!(
                    "Recovery of {} abandoned with {} share(s) collected",
                    secret_id.short(),
                    self.recovery.pending_count(secret_id)
                );
                self.recovery.finish();
            }
            _ => return,
        }
        self.workflow = Workflow::Idle;
    }
}

impl Participant for Owner {
    fn id(&self) -> ParticipantId {
        ParticipantId::Owner
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
