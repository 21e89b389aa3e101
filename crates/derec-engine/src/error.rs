//! Error types for secret-sharing engine operations

use derec_core::ChannelId;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during engine operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No channels to split across
    #[error("Cannot protect a secret without channels")]
    NoChannels,

    /// Invalid threshold
    #[error("Invalid threshold: {threshold} must be >= 1 and <= {participants}")]
    InvalidThreshold {
        threshold: usize,
        participants: usize,
    },

    /// Too many channels for GF(2^8) coordinates
    #[error("Too many channels: {got} (max {max})")]
    TooManyChannels { got: usize, max: usize },

    /// The same channel was listed twice
    #[error("Duplicate channel: {0}")]
    DuplicateChannel(ChannelId),

    /// Fewer responses than the share threshold
    #[error("Insufficient shares: need {need}, got {got}")]
    InsufficientShares { need: usize, got: usize },

    /// Blob belongs to a different secret, version or channel
    #[error("Blob mismatch: {0}")]
    Mismatch(String),

    /// Reconstructed secret does not match the share commitment
    #[error("Reconstructed secret failed its commitment check")]
    CommitmentMismatch,

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Internal error
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl From<bitcode::Error> for CryptoError {
    fn from(e: bitcode::Error) -> Self {
        CryptoError::Deserialization(e.to_string())
    }
}
