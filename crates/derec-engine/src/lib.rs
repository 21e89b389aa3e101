//! DeRec Engine - Secret-sharing engine contract
//!
//! The orchestration layer treats the engine as an opaque, synchronous
//! library: it splits secrets into per-channel shares, produces and answers
//! share and verification requests, and reconstructs a secret from a quorum
//! of share responses. [`SecretSharingEngine`] is that contract;
//! [`ShamirEngine`] is a reference implementation using Shamir secret
//! sharing over GF(2^8).
//!
//! Engine outputs are always normalized to [`ShareMap`] so callers never
//! inspect payload shapes at runtime.

pub mod blobs;
pub mod engine;
pub mod error;
pub mod gf256;
pub mod polynomial;
pub mod shamir;
pub mod traits;

pub use engine::ShamirEngine;
pub use error::{CryptoError, Result};
pub use traits::{SecretSharingEngine, ShareMap};

/// Maximum number of shares a secret can be split into
pub const MAX_SHARES: usize = 255;
