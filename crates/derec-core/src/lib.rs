//! DeRec Core - Shared types, wire protocol, and liveness tracking
//!
//! This crate provides the foundational types used by every participant of
//! the decentralized secret-recovery protocol: participant identities, the
//! JSON message envelope exchanged over the bus, and the liveness tracker
//! both roles use to decide who is online.

pub mod encoding;
pub mod error;
pub mod liveness;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use liveness::LivenessTracker;
pub use message::{Envelope, Message, ShareInfo, VerificationFailure};
pub use types::{now_millis, ChannelId, HelperId, ParticipantId, Role, SecretId, Timestamp};

/// Number of helper slots in a deployment
pub const MAX_HELPERS: u8 = 3;

/// Minimum paired helpers before a secret may be protected
pub const MIN_PAIRED_HELPERS: usize = 3;

/// Shares required to reconstruct a secret
pub const DEFAULT_THRESHOLD: usize = 2;

/// Distinct helpers that must report a discovered secret before it is recoverable
pub const DISCOVERY_QUORUM: usize = DEFAULT_THRESHOLD;

/// Version assigned to a freshly protected secret
pub const INITIAL_SECRET_VERSION: u32 = 1;

/// Silence after which a peer is considered offline
pub const OFFLINE_THRESHOLD_MS: u64 = 15_000;

/// Owner re-announce period
pub const ANNOUNCE_INTERVAL_MS: u64 = 10_000;

/// How often liveness is re-evaluated
pub const LIVENESS_CHECK_INTERVAL_MS: u64 = 1_000;

/// Delay before the first verification round
pub const VERIFICATION_INITIAL_DELAY_MS: u64 = 2_000;

/// Period between verification rounds
pub const VERIFICATION_INTERVAL_MS: u64 = 10_000;

/// Time allowed for helpers to answer a pairing round
pub const PAIRING_TIMEOUT_MS: u64 = 2_000;

/// Time allowed for helpers to acknowledge distributed shares
pub const PROTECT_TIMEOUT_MS: u64 = 5_000;

/// Time after which an incomplete recovery is abandoned
pub const RECOVERY_TIMEOUT_MS: u64 = 30_000;

/// Delay between storing a share and acknowledging it
pub const SHARE_ACK_DELAY_MS: u64 = 100;
