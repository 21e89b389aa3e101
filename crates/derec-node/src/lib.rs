//! DeRec Node - Protocol roles for decentralized secret recovery
//!
//! This crate provides:
//! - The in-process message bus every participant talks over
//! - The Owner state machine: discovery, pairing, protection,
//!   verification, and threshold-gated recovery
//! - The Helper state machine: pairing approval, share storage,
//!   verification and recovery responses, share listing
//! - A tokio driver running one participant per task
//!
//! Both roles are sans-IO: they take the current time and return the
//! envelopes to publish, so they can be driven by the async runtime or
//! stepped directly in tests.

pub mod bus;
pub mod config;
pub mod error;
pub mod helper;
pub mod owner;
pub mod runtime;

pub use bus::{LocalBus, MessageBus, Subscription};
pub use config::{NodeConfig, RecoveryPolicyKind};
pub use error::{NodeError, Result};
pub use helper::{Helper, HelperSnapshot, RecoveryPolicy};
pub use owner::{Owner, OwnerSnapshot, VerificationStatus, Workflow};
pub use runtime::{spawn_node, Clock, NodeHandle, Participant};
