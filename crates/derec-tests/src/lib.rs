//! Test harness for DeRec
//!
//! [`Network`] routes envelopes between one owner and three helpers
//! synchronously, using the bus addressing rules, and only moves time when
//! a test advances it. Participants that are disconnected miss whatever is
//! published while they are away, as on the real bus.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use derec_core::{ChannelId, Envelope, HelperId, ParticipantId, SecretId, Timestamp};
use derec_engine::{CryptoError, SecretSharingEngine, ShamirEngine, ShareMap};
use derec_node::{Helper, NodeConfig, Owner, Result};

/// Clock origin for every network
pub const START: Timestamp = 1_700_000_000_000;

/// Upper bound on envelopes routed by one call to [`Network::run`]
const MAX_ROUTED: usize = 10_000;

/// Install a test-friendly tracing subscriber (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shorthand for a helper id known to be valid
pub fn helper_id(n: u8) -> HelperId {
    HelperId::new(n).unwrap_or_else(|e| panic!("bad helper id {}: {}", n, e))
}

/// Engine wrapper counting reconstruction attempts
pub struct CountingEngine {
    inner: ShamirEngine,
    recoveries: AtomicUsize,
}

impl CountingEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ShamirEngine::from_seed(seed),
            recoveries: AtomicUsize::new(0),
        }
    }

    /// Calls made to `recover_from_share_responses` so far
    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }
}

impl SecretSharingEngine for CountingEngine {
    fn create_contact_message(
        &self,
        channel: ChannelId,
        transport_uri: &str,
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner.create_contact_message(channel, transport_uri)
    }

    fn protect_secret(
        &self,
        secret_id: &[u8],
        plaintext: &[u8],
        channels: &[ChannelId],
        threshold: usize,
        version: u32,
    ) -> derec_engine::Result<ShareMap> {
        self.inner
            .protect_secret(secret_id, plaintext, channels, threshold, version)
    }

    fn generate_share_request(
        &self,
        channel: ChannelId,
        secret_id: &[u8],
        version: u32,
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner.generate_share_request(channel, secret_id, version)
    }

    fn generate_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner
            .generate_share_response(secret_id, channel, share, request)
    }

    fn recover_from_share_responses(
        &self,
        responses: &ShareMap,
        secret_id: &[u8],
        version: u32,
    ) -> derec_engine::Result<Vec<u8>> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        self.inner
            .recover_from_share_responses(responses, secret_id, version)
    }

    fn generate_verification_request(
        &self,
        secret_id: &[u8],
        version: u32,
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner.generate_verification_request(secret_id, version)
    }

    fn generate_verification_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner
            .generate_verification_response(secret_id, channel, share, request)
    }

    fn verify_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        response: &[u8],
    ) -> derec_engine::Result<bool> {
        self.inner
            .verify_share_response(secret_id, channel, share, response)
    }
}

/// Engine operation a [`FaultyEngine`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fault {
    /// `create_contact_message` for one channel
    Contact(ChannelId),
    /// `protect_secret`
    Split,
    /// `recover_from_share_responses`
    Reconstruct,
}

/// Counting engine that fails the operations it is told to
pub struct FaultyEngine {
    inner: CountingEngine,
    faults: Mutex<BTreeSet<Fault>>,
}

impl FaultyEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: CountingEngine::new(seed),
            faults: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn fail(&self, fault: Fault) {
        self.faults().insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        self.faults().remove(&fault);
    }

    pub fn recoveries(&self) -> usize {
        self.inner.recoveries()
    }

    fn faults(&self) -> MutexGuard<'_, BTreeSet<Fault>> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, fault: Fault) -> derec_engine::Result<()> {
        if self.faults().contains(&fault) {
            return Err(CryptoError::Internal(format!("injected {:?}", fault)));
        }
        Ok(())
    }
}

impl SecretSharingEngine for FaultyEngine {
    fn create_contact_message(
        &self,
        channel: ChannelId,
        transport_uri: &str,
    ) -> derec_engine::Result<Vec<u8>> {
        self.check(Fault::Contact(channel))?;
        self.inner.create_contact_message(channel, transport_uri)
    }

    fn protect_secret(
        &self,
        secret_id: &[u8],
        plaintext: &[u8],
        channels: &[ChannelId],
        threshold: usize,
        version: u32,
    ) -> derec_engine::Result<ShareMap> {
        self.check(Fault::Split)?;
        self.inner
            .protect_secret(secret_id, plaintext, channels, threshold, version)
    }

    fn generate_share_request(
        &self,
        channel: ChannelId,
        secret_id: &[u8],
        version: u32,
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner.generate_share_request(channel, secret_id, version)
    }

    fn generate_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner
            .generate_share_response(secret_id, channel, share, request)
    }

    fn recover_from_share_responses(
        &self,
        responses: &ShareMap,
        secret_id: &[u8],
        version: u32,
    ) -> derec_engine::Result<Vec<u8>> {
        if let Err(e) = self.check(Fault::Reconstruct) {
            // Still an attempt as far as the owner is concerned
            self.inner.recoveries.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }
        self.inner
            .recover_from_share_responses(responses, secret_id, version)
    }

    fn generate_verification_request(
        &self,
        secret_id: &[u8],
        version: u32,
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner.generate_verification_request(secret_id, version)
    }

    fn generate_verification_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        request: &[u8],
    ) -> derec_engine::Result<Vec<u8>> {
        self.inner
            .generate_verification_response(secret_id, channel, share, request)
    }

    fn verify_share_response(
        &self,
        secret_id: &[u8],
        channel: ChannelId,
        share: &[u8],
        response: &[u8],
    ) -> derec_engine::Result<bool> {
        self.inner
            .verify_share_response(secret_id, channel, share, response)
    }
}

/// One owner and three helpers wired together in memory
pub struct Network {
    owner: Owner,
    helpers: Vec<Helper>,
    config: NodeConfig,
    engine: Arc<dyn SecretSharingEngine>,
    now: Timestamp,
    queue: VecDeque<Envelope>,
    connected: BTreeSet<ParticipantId>,
    log: Vec<Envelope>,
}

impl Network {
    /// Default configuration, deterministic engine
    pub fn new() -> Self {
        Self::with_config(NodeConfig::default())
    }

    pub fn with_config(config: NodeConfig) -> Self {
        Self::with_engine(config, Arc::new(ShamirEngine::from_seed(7)))
    }

    /// Build a network where every participant shares `engine`
    pub fn with_engine(config: NodeConfig, engine: Arc<dyn SecretSharingEngine>) -> Self {
        let helpers = HelperId::all()
            .map(|id| Helper::new(id, config.clone(), Arc::clone(&engine)))
            .collect();
        Self {
            owner: Owner::new(config.clone(), Arc::clone(&engine)),
            helpers,
            config,
            engine,
            now: START,
            queue: VecDeque::new(),
            connected: BTreeSet::new(),
            log: Vec::new(),
        }
    }

    /// Connect the three helpers, then the owner
    pub fn start(&mut self) {
        for id in HelperId::all() {
            self.connect(id.into());
        }
        self.connect(ParticipantId::Owner);
    }

    /// Start and pair all three helpers
    pub fn paired() -> Self {
        let mut net = Self::new();
        net.start();
        net.pair_all()
            .unwrap_or_else(|e| panic!("pairing failed: {}", e));
        net
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The engine every participant uses
    pub fn engine(&self) -> &dyn SecretSharingEngine {
        self.engine.as_ref()
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut Owner {
        &mut self.owner
    }

    pub fn helper(&self, n: u8) -> &Helper {
        &self.helpers[usize::from(n) - 1]
    }

    pub fn helper_mut(&mut self, n: u8) -> &mut Helper {
        &mut self.helpers[usize::from(n) - 1]
    }

    // ============ Connectivity ============

    /// Subscribe a participant and route its connect announcement
    pub fn connect(&mut self, id: ParticipantId) {
        self.connected.insert(id);
        let out = match id {
            ParticipantId::Owner => self.owner.connect(self.now),
            ParticipantId::Helper(h) => self.helpers[usize::from(h.get()) - 1].connect(self.now),
        };
        self.queue.extend(out);
        self.run();
    }

    /// Unsubscribe a participant and stop its timers
    pub fn disconnect(&mut self, id: ParticipantId) {
        if self.connected.remove(&id) {
            match id {
                ParticipantId::Owner => self.owner.disconnect(),
                ParticipantId::Helper(h) => self.helpers[usize::from(h.get()) - 1].disconnect(),
            }
        }
    }

    /// Replace the owner with a fresh one using `config`
    ///
    /// Helpers keep their state, as when an owner loses its device.
    pub fn restart_owner(&mut self, config: NodeConfig) {
        self.disconnect(ParticipantId::Owner);
        self.owner = Owner::new(config.clone(), Arc::clone(&self.engine));
        self.config = config;
        self.connect(ParticipantId::Owner);
    }

    pub fn is_connected(&self, id: ParticipantId) -> bool {
        self.connected.contains(&id)
    }

    // ============ Driving ============

    /// Run an owner action at the current time and route its output
    pub fn owner_act<F>(&mut self, action: F) -> Result<()>
    where
        F: FnOnce(&mut Owner, Timestamp) -> Result<Vec<Envelope>>,
    {
        let out = action(&mut self.owner, self.now)?;
        self.queue.extend(out);
        self.run();
        Ok(())
    }

    /// Run an operator action on helper `n` and route its output
    pub fn helper_act<F>(&mut self, n: u8, action: F) -> Result<()>
    where
        F: FnOnce(&mut Helper, Timestamp) -> Result<Vec<Envelope>>,
    {
        let now = self.now;
        let out = action(self.helper_mut(n), now)?;
        self.queue.extend(out);
        self.run();
        Ok(())
    }

    /// Publish an arbitrary envelope
    pub fn inject(&mut self, envelope: Envelope) {
        self.queue.push_back(envelope);
        self.run();
    }

    /// Route queued envelopes until the network is quiet
    pub fn run(&mut self) {
        let mut routed = 0;
        while let Some(envelope) = self.queue.pop_front() {
            routed += 1;
            assert!(routed <= MAX_ROUTED, "message storm: routed {} envelopes", routed);

            let targets: Vec<ParticipantId> = self
                .connected
                .iter()
                .copied()
                .filter(|id| envelope.is_for(*id))
                .collect();
            for target in targets {
                let out = match target {
                    ParticipantId::Owner => self.owner.handle_message(&envelope, self.now),
                    ParticipantId::Helper(h) => {
                        self.helpers[usize::from(h.get()) - 1].handle_message(&envelope, self.now)
                    }
                };
                self.queue.extend(out);
            }
            self.log.push(envelope);
        }
    }

    /// Move time forward by `ms`, ticking every connected participant at
    /// the configured tick interval
    pub fn advance(&mut self, ms: u64) {
        let target = self.now + ms;
        let step = self.config.tick_interval_ms.max(1);
        while self.now < target {
            self.now = (self.now + step).min(target);
            let connected: Vec<ParticipantId> = self.connected.iter().copied().collect();
            for id in connected {
                let out = match id {
                    ParticipantId::Owner => self.owner.tick(self.now),
                    ParticipantId::Helper(h) => {
                        self.helpers[usize::from(h.get()) - 1].tick(self.now)
                    }
                };
                self.queue.extend(out);
            }
            self.run();
        }
    }

    // ============ Observation ============

    /// Every envelope routed so far, in order
    pub fn log(&self) -> &[Envelope] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Number of routed envelopes of `kind` (e.g. `"SHARE_ACK"`)
    pub fn sent(&self, kind: &str) -> usize {
        self.log.iter().filter(|e| e.message.kind() == kind).count()
    }

    /// Number of routed envelopes of `kind` addressed to `to`
    pub fn sent_to(&self, kind: &str, to: ParticipantId) -> usize {
        self.log
            .iter()
            .filter(|e| e.message.kind() == kind && e.to == Some(to))
            .count()
    }

    // ============ Common flows ============

    /// Request pairing and approve it on every helper holding a request
    pub fn pair_all(&mut self) -> Result<()> {
        self.owner_act(|o, now| o.pair_with_helpers(now))?;
        let name = self.config.owner_name.clone();
        for id in HelperId::all() {
            if self.helper(id.get()).pending_requests().any(|r| r.owner_name == name) {
                self.helper_act(id.get(), |h, now| h.approve_pairing(&name, now))?;
            }
        }
        Ok(())
    }

    /// Protect a secret and wait out the acknowledgement delay
    pub fn protect(&mut self, name: &str, value: &str) -> Result<SecretId> {
        self.owner_act(|o, now| o.protect_secret(name, value, now))?;
        let wait = self.config.share_ack_delay_ms + self.config.tick_interval_ms;
        self.advance(wait);
        let id = self
            .owner
            .secrets()
            .last()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| panic!("protect_secret recorded no secret"));
        Ok(id)
    }

    /// Wait long enough for one verification round to complete
    pub fn await_verification(&mut self) {
        let wait = self.config.verification_initial_delay_ms + self.config.tick_interval_ms;
        self.advance(wait);
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}
